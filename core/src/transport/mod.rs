//! TCP links between the central and its peripherals

pub mod framing;
pub mod link;
pub mod server;

pub use framing::{read_frame, write_frame};
pub use link::{Link, LinkReader, LinkWriter};
pub use server::{LinkEvent, LinkRegistry, LinkServer, LinkServerHandle};
