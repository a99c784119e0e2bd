//! Function request paths: `/function/<name>` or `/function/<name>/<rest>`.

use crate::error::{Error, Result};

/// A request path addressed to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPath<'a> {
    /// Function name.
    pub function: &'a str,
    /// Trailing path segment after the function name, if any.
    pub rest: Option<&'a str>,
}

impl<'a> FunctionPath<'a> {
    /// Parses a request path (without query string).
    pub fn parse(path: &'a str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        match *segments.as_slice() {
            ["", "function", function] if !function.is_empty() => Ok(Self {
                function,
                rest: None,
            }),
            ["", "function", function, rest] if !function.is_empty() => Ok(Self {
                function,
                rest: Some(rest),
            }),
            [_, "function", ..] if segments.len() <= 4 => {
                Err(Error::MalformedPath(format!("missing function name: {path}")))
            }
            [_, "function", ..] => Err(Error::MalformedPath(path.to_string())),
            _ => Err(Error::MalformedPath(format!("not a function call: {path}"))),
        }
    }

    /// Path a gateway expects: the bare function root.
    pub fn gateway_path(&self) -> String {
        format!("/function/{}", self.function)
    }

    /// Path a function instance expects: the trailing segment, or `/`.
    pub fn instance_path(&self) -> String {
        format!("/{}", self.rest.unwrap_or_default())
    }
}
