/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{fmt::Display, io::ErrorKind, panic::Location};

#[derive(Debug, Clone)]
pub struct PreflateError {
    /// standard error code
    exit_code: ExitCode,

    /// diagnostic message including location. Content should not be relied on.
    message: String,
}

pub type Result<T> = std::result::Result<T, PreflateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExitCode {
    /// The DEFLATE stream is structurally invalid (bad block header, bad Huffman table,
    /// invalid symbol or a distance that reaches before the start of the data).
    InvalidDeflate = 1,

    /// The diff stream is truncated, corrupted or doesn't match the payload.
    InvalidPredictionData = 2,

    /// The predictor cannot represent the choice the original encoder made.
    PredictionFailure = 3,

    /// Replaying the corrections didn't produce the same tokens that were analyzed.
    RoundtripMismatch = 5,

    /// The input ended before the requested amount of data could be read.
    ShortRead = 16,

    /// Any other IO error from a reader or writer.
    OsError = 17,

    /// A worker task panicked or some other unexpected condition.
    GeneralFailure = 18,
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for PreflateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}: {1}", self.exit_code, self.message)
    }
}

impl PreflateError {
    pub fn new(exit_code: ExitCode, message: impl AsRef<str>) -> PreflateError {
        PreflateError {
            exit_code,
            message: message.as_ref().to_owned(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    #[cold]
    #[track_caller]
    pub fn add_context(&mut self) {
        self.message
            .push_str(&format!("\n at {}", Location::caller().to_string()));
    }

    #[cold]
    pub fn add_context_message(&mut self, location: &Location, message: &str) {
        self.message
            .push_str(&format!("\n at {} ({})", location.to_string(), message));
    }
}

/// returns an error with the given exit code and message
#[cold]
#[track_caller]
pub fn err_exit_code<T>(exit_code: ExitCode, message: impl AsRef<str>) -> Result<T> {
    let mut e = PreflateError::new(exit_code, message);
    e.add_context();
    Err(e)
}

/// Adds the caller location (and optionally a message) to the error as it is
/// propagated, keeping the original exit code.
pub trait AddContext<T> {
    #[track_caller]
    fn context(self) -> Result<T>;

    #[track_caller]
    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<PreflateError>> AddContext<T> for std::result::Result<T, E> {
    #[track_caller]
    fn context(self) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.add_context();
                Err(e)
            }
        }
    }

    #[track_caller]
    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.add_context_message(Location::caller(), &f().to_string());
                Err(e)
            }
        }
    }
}

fn get_io_error_exit_code(e: &std::io::Error) -> ExitCode {
    if e.kind() == ErrorKind::UnexpectedEof {
        ExitCode::ShortRead
    } else {
        ExitCode::OsError
    }
}

/// translates std::io::Error into PreflateError, unwrapping a PreflateError
/// that was tunneled through an io::Error
impl From<std::io::Error> for PreflateError {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        match e.downcast::<PreflateError>() {
            Ok(pe) => pe,
            Err(e) => {
                let caller = Location::caller();
                PreflateError {
                    exit_code: get_io_error_exit_code(&e),
                    message: format!("error {} at {}", e, caller),
                }
            }
        }
    }
}

/// translates PreflateError into std::io::Error, which involves putting into a Box and using Other
impl From<PreflateError> for std::io::Error {
    fn from(e: PreflateError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

impl From<bitcode::Error> for PreflateError {
    #[track_caller]
    fn from(e: bitcode::Error) -> Self {
        PreflateError::new(
            ExitCode::InvalidPredictionData,
            format!("bitcode: {} at {}", e, Location::caller()),
        )
    }
}

impl std::error::Error for PreflateError {}

#[test]
fn test_error_translation() {
    // test wrapping inside an io error
    fn my_std_error() -> std::result::Result<(), std::io::Error> {
        Err(PreflateError::new(ExitCode::InvalidDeflate, "test error").into())
    }

    let e: PreflateError = my_std_error().unwrap_err().into();
    assert_eq!(e.exit_code, ExitCode::InvalidDeflate);
    assert_eq!(e.message, "test error");

    // an IO error should be translated into an OsError
    let e: PreflateError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
    assert_eq!(e.exit_code, ExitCode::OsError);

    // and a truncated read into a ShortRead
    let e: PreflateError = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
    assert_eq!(e.exit_code, ExitCode::ShortRead);
}

#[test]
fn test_context_keeps_exit_code() {
    fn inner() -> Result<u32> {
        err_exit_code(ExitCode::PredictionFailure, "no match")
    }

    let e = inner().with_context(|| "block 7").unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::PredictionFailure);
    assert!(e.message().starts_with("no match"));
    assert!(e.message().contains("block 7"));
}
