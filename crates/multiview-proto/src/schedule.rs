use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::ViewOrder;
use crate::selection::Slots;

/// A saved layout to be applied verbatim at `activate_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub activate_at: DateTime<Utc>,
    pub selected_events: Slots,
    #[serde(default)]
    pub view_order: ViewOrder,
}

/// Schedules keyed by creation id, kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Schedule>", into = "Vec<Schedule>")]
pub struct ScheduleList(Vec<Schedule>);

impl ScheduleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schedule> {
        self.0.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Schedule> {
        self.0.iter().find(|schedule| schedule.id == id)
    }

    /// Inserts or replaces by id; a replaced entry keeps its position.
    pub fn upsert(&mut self, schedule: Schedule) {
        match self.0.iter_mut().find(|existing| existing.id == schedule.id) {
            Some(existing) => *existing = schedule,
            None => self.0.push(schedule),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Schedule> {
        let position = self.0.iter().position(|schedule| schedule.id == id)?;
        Some(self.0.remove(position))
    }
}

impl From<Vec<Schedule>> for ScheduleList {
    fn from(schedules: Vec<Schedule>) -> Self {
        let mut list = ScheduleList::new();
        for schedule in schedules {
            list.upsert(schedule);
        }
        list
    }
}

impl From<ScheduleList> for Vec<Schedule> {
    fn from(list: ScheduleList) -> Self {
        list.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(id: &str, name: &str) -> Schedule {
        Schedule {
            id: id.into(),
            name: name.into(),
            activate_at: Utc.with_ymd_and_hms(2026, 11, 2, 18, 30, 0).unwrap(),
            selected_events: Slots::new(),
            view_order: ViewOrder::identity(),
        }
    }

    #[test]
    fn duplicate_ids_collapse_to_latest() {
        let list = ScheduleList::from(vec![
            schedule("s1", "first"),
            schedule("s2", "second"),
            schedule("s1", "first, edited"),
        ]);
        assert_eq!(list.len(), 2);
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first, edited", "second"]);
    }

    #[test]
    fn remove_by_id() {
        let mut list = ScheduleList::from(vec![schedule("s1", "a"), schedule("s2", "b")]);
        assert_eq!(list.remove("s1").map(|s| s.name), Some("a".to_string()));
        assert!(list.remove("missing").is_none());
        assert!(list.get("s2").is_some());
    }
}
