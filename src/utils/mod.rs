/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/5/25
******************************************************************************/

/// Module containing custom error types used throughout the library.
///
/// This module provides specialized error types for handling different error scenarios,
/// such as illegal arguments, illegal states and internal session failures.
pub mod error;
mod util;

mod logger;

pub use error::{IllegalArgumentException, IllegalStateException, SessionError};
pub use logger::{setup_logger, setup_logger_with_level};
pub(crate) use util::{decode_text, encode_text, parse_arguments};
