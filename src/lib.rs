#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod ddp;
pub mod error;
pub(crate) mod serde_helpers;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
