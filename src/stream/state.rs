//! Lifecycle bits of a stream pair.
//!
//! Both directions move through opening, opened, closing and closed on
//! their own. Setting a later bit always sets the earlier ones, so
//! `initial_closed(state)` implies `initial_closing(state)` and so on.

pub const REPLY_OPENING: u8 = 0x01;
pub const REPLY_OPENED: u8 = 0x02;
pub const REPLY_CLOSING: u8 = 0x04;
pub const REPLY_CLOSED: u8 = 0x08;
pub const INITIAL_OPENING: u8 = 0x10;
pub const INITIAL_OPENED: u8 = 0x20;
pub const INITIAL_CLOSING: u8 = 0x40;
pub const INITIAL_CLOSED: u8 = 0x80;

const REPLY_MASK: u8 = 0x0f;

pub fn opening_initial(state: u8) -> u8 {
    state | INITIAL_OPENING
}

pub fn opened_initial(state: u8) -> u8 {
    state | INITIAL_OPENING | INITIAL_OPENED
}

pub fn closing_initial(state: u8) -> u8 {
    state | INITIAL_CLOSING
}

pub fn closed_initial(state: u8) -> u8 {
    state | INITIAL_CLOSING | INITIAL_CLOSED
}

pub fn opening_reply(state: u8) -> u8 {
    state | REPLY_OPENING
}

pub fn opened_reply(state: u8) -> u8 {
    state | REPLY_OPENING | REPLY_OPENED
}

pub fn closing_reply(state: u8) -> u8 {
    state | REPLY_CLOSING
}

pub fn closed_reply(state: u8) -> u8 {
    state | REPLY_CLOSING | REPLY_CLOSED
}

pub fn initial_opening(state: u8) -> bool {
    state & INITIAL_OPENING != 0
}

pub fn initial_opened(state: u8) -> bool {
    state & INITIAL_OPENED != 0
}

pub fn initial_closing(state: u8) -> bool {
    state & INITIAL_CLOSING != 0
}

pub fn initial_closed(state: u8) -> bool {
    state & INITIAL_CLOSED != 0
}

pub fn reply_opening(state: u8) -> bool {
    state & REPLY_OPENING != 0
}

pub fn reply_opened(state: u8) -> bool {
    state & REPLY_OPENED != 0
}

pub fn reply_closing(state: u8) -> bool {
    state & REPLY_CLOSING != 0
}

pub fn reply_closed(state: u8) -> bool {
    state & REPLY_CLOSED != 0
}

/// Both directions closed.
pub fn closed(state: u8) -> bool {
    initial_closed(state) && reply_closed(state)
}

/// Clears the reply bits so the reply can be opened again.
pub fn reset_reply(state: u8) -> u8 {
    state & !REPLY_MASK
}
