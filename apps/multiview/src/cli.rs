//! Line commands accepted by the CLI host on stdin.

use std::fmt::Write as _;

use multiview_proto::{FeedRef, SlotIndex, ViewState};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    Set { slot: usize, feed: FeedRef },
    Clear { slot: usize },
    Order(Vec<usize>),
    Gap(u32),
    Color(String),
    Chat(bool),
    Fullscreen(Option<SlotIndex>),
    Reload(SlotIndex),
    Show,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
commands:
  set <slot> <feed-id> <url> [title]   show a feed in a window
  clear <slot>                         empty a window
  order <slot> [slot...]               reorder windows
  gap <0-32>                           spacing between windows
  color <#hex|name>                    border color
  chat on|off                          toggle the chat pane
  fullscreen <slot>|off                fullscreen one window
  reload <slot>                        re-fetch one window
  show                                 print the current view
  quit                                 end the session";

pub fn parse_line(line: &str) -> Result<LineCommand, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(ParseError::Empty);
    };
    let rest: Vec<&str> = words.collect();

    match verb {
        "set" => {
            const USAGE: &str = "set <slot> <feed-id> <url> [title]";
            let [slot, id, url, title @ ..] = rest.as_slice() else {
                return Err(ParseError::Usage(USAGE));
            };
            let slot = slot.parse().map_err(|_| ParseError::Usage(USAGE))?;
            let title = if title.is_empty() {
                id.to_string()
            } else {
                title.join(" ")
            };
            Ok(LineCommand::Set {
                slot,
                feed: FeedRef::new(*id, title, *url),
            })
        }
        "clear" => match rest.as_slice() {
            [slot] => slot
                .parse()
                .map(|slot| LineCommand::Clear { slot })
                .map_err(|_| ParseError::Usage("clear <slot>")),
            _ => Err(ParseError::Usage("clear <slot>")),
        },
        "order" => {
            if rest.is_empty() {
                return Err(ParseError::Usage("order <slot> [slot...]"));
            }
            rest.iter()
                .map(|raw| raw.parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map(LineCommand::Order)
                .map_err(|_| ParseError::Usage("order <slot> [slot...]"))
        }
        "gap" => match rest.as_slice() {
            [gap] => gap
                .parse()
                .map(LineCommand::Gap)
                .map_err(|_| ParseError::Usage("gap <0-32>")),
            _ => Err(ParseError::Usage("gap <0-32>")),
        },
        "color" => match rest.as_slice() {
            [color] => Ok(LineCommand::Color(color.to_string())),
            _ => Err(ParseError::Usage("color <#hex|name>")),
        },
        "chat" => match rest.as_slice() {
            ["on"] => Ok(LineCommand::Chat(true)),
            ["off"] => Ok(LineCommand::Chat(false)),
            _ => Err(ParseError::Usage("chat on|off")),
        },
        "fullscreen" => match rest.as_slice() {
            ["off"] => Ok(LineCommand::Fullscreen(None)),
            [slot] => parse_slot(slot, "fullscreen <slot>|off")
                .map(|slot| LineCommand::Fullscreen(Some(slot))),
            _ => Err(ParseError::Usage("fullscreen <slot>|off")),
        },
        "reload" => match rest.as_slice() {
            [slot] => parse_slot(slot, "reload <slot>").map(LineCommand::Reload),
            _ => Err(ParseError::Usage("reload <slot>")),
        },
        "show" => Ok(LineCommand::Show),
        "quit" | "exit" => Ok(LineCommand::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn parse_slot(raw: &str, usage: &'static str) -> Result<SlotIndex, ParseError> {
    raw.parse::<usize>()
        .ok()
        .and_then(|index| SlotIndex::new(index).ok())
        .ok_or(ParseError::Usage(usage))
}

/// Human-readable dump used by `show`.
pub fn describe(state: &ViewState) -> String {
    let mut out = String::new();
    for slot in state.render_order() {
        let marker = if state.fullscreen_index == Some(slot) { "*" } else { " " };
        match state.selected_events.get(slot) {
            Some(feed) => {
                let _ = writeln!(out, "{marker}[{slot}] {} ({})", feed.title, feed.selected_option);
            }
            None => {
                let _ = writeln!(out, "{marker}[{slot}] -");
            }
        }
    }
    let _ = write!(
        out,
        "gap={} border={} chat={} schedules={}",
        state.layout.gap(),
        state.layout.border_color().as_str(),
        if state.layout.chat_enabled() { "on" } else { "off" },
        state.schedules.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_optional_title() {
        let parsed = parse_line("set 2 feed-7 https://embed.example/7 Late Match").unwrap();
        assert_eq!(
            parsed,
            LineCommand::Set {
                slot: 2,
                feed: FeedRef::new("feed-7", "Late Match", "https://embed.example/7"),
            }
        );
        let LineCommand::Set { feed, .. } = parse_line("set 0 a https://x").unwrap() else {
            panic!("expected set");
        };
        assert_eq!(feed.title, "a");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
        assert_eq!(parse_line("dance"), Err(ParseError::Unknown("dance".into())));
        assert!(matches!(parse_line("set 1 a"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_line("reload 9"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_line("chat maybe"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn parses_display_commands() {
        assert_eq!(
            parse_line("fullscreen 4").unwrap(),
            LineCommand::Fullscreen(SlotIndex::new(4).ok())
        );
        assert_eq!(parse_line("fullscreen off").unwrap(), LineCommand::Fullscreen(None));
        assert_eq!(
            parse_line("reload 2").unwrap(),
            LineCommand::Reload(SlotIndex::new(2).unwrap())
        );
        assert_eq!(parse_line("order 3 1").unwrap(), LineCommand::Order(vec![3, 1]));
    }

    #[test]
    fn describe_lists_occupied_windows_first() {
        let mut state = ViewState::new();
        state
            .set_slot(5, Some(FeedRef::new("a", "Alpha", "https://embed.example/a")))
            .unwrap();
        let text = describe(&state);
        let first = text.lines().next().unwrap();
        assert_eq!(first, " [5] Alpha (https://embed.example/a)");
        assert!(text.ends_with("gap=4 border=#000000 chat=off schedules=0"));
    }
}
