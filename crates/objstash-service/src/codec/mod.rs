//! The canonical binary encoding of [`Value`](crate::types::Value)s.
//!
//! The encoding is deterministic and self-describing: every object records its type name and
//! its ordered fields, so decoding only needs a [`TypeResolver`](crate::types::TypeResolver) to
//! map type names back to descriptors.
//!
//! # Layout
//!
//! An encoded value starts with a single [`FORMAT_VERSION`] byte, followed by the root value.
//! Every value starts with a one-byte tag:
//!
//! | tag    | kind           | payload                                          |
//! |--------|----------------|--------------------------------------------------|
//! | `0x00` | null           |                                                  |
//! | `0x01` | false          |                                                  |
//! | `0x02` | true           |                                                  |
//! | `0x03` | int            | `i64`                                            |
//! | `0x04` | float          | `f64` bit pattern                                |
//! | `0x05` | string         | `str`                                            |
//! | `0x06` | bytes          | `u32` length, raw bytes                          |
//! | `0x07` | list           | `u32` count, values                              |
//! | `0x08` | map            | `u32` count, (`str` key, value) pairs            |
//! | `0x09` | object         | `str` type name, `u32` count, (`str` name, value) pairs |
//! | `0x0a` | back reference | `u32` first-seen object index                    |
//!
//! All integers are little endian, a `str` is a `u32` byte length followed by UTF-8.
//!
//! Objects are numbered in the order in which the encoder first visits them (pre-order, before
//! their fields). With back references enabled, any further occurrence of an object is written
//! as a back reference to that number, which preserves aliasing and cycles through a round trip.

mod decode;
mod encode;

pub use decode::{DecodeOptions, Decoded, decode};
pub use encode::{EncodeOptions, encode};

/// Version byte prefixed to every encoded value.
pub const FORMAT_VERSION: u8 = 1;

pub(crate) mod tag {
    pub const NULL: u8 = 0x00;
    pub const FALSE: u8 = 0x01;
    pub const TRUE: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const STRING: u8 = 0x05;
    pub const BYTES: u8 = 0x06;
    pub const LIST: u8 = 0x07;
    pub const MAP: u8 = 0x08;
    pub const OBJECT: u8 = 0x09;
    pub const BACK_REF: u8 = 0x0a;
}
