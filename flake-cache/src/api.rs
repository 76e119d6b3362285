//! Tagged results for a command-line front end.
//!
//! Every function returns a [`Response`] instead of an error so that the
//! caller renders success and failure the same way.

use crate::cache::{FlakeCache, Selected};
use crate::error::Error;
use flake_selector::Selector;
use nix_executor::{FlakeEvaluator, NixCommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response<T> {
    Ok {
        value: T,
    },
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}

impl<T, E: Into<Error>> From<Result<T, E>> for Response<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Response::Ok { value },
            Err(err) => {
                let err = err.into();
                Response::Error {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    stderr: err.stderr().map(str::to_string),
                }
            }
        }
    }
}

pub async fn evaluate<E: FlakeEvaluator>(
    cache: &FlakeCache<E>,
    flake: &str,
    text: &str,
) -> Response<Selected> {
    cache.get_str(flake, text).await.into()
}

/// Invalidate one selector, or the whole flake reference when `text` is `None`.
/// The value is the number of removed entries.
pub async fn invalidate<E: FlakeEvaluator>(
    cache: &FlakeCache<E>,
    flake: &str,
    text: Option<&str>,
) -> Response<usize> {
    let result = async {
        let selector = text.map(Selector::parse).transpose()?;
        Ok::<_, Error>(cache.invalidate(flake, selector.as_ref()).await?)
    };
    result.await.into()
}

pub async fn build(
    command: &NixCommand,
    flake: &str,
    text: &str,
    out_link: Option<&Path>,
) -> Response<Vec<PathBuf>> {
    let result = async {
        let selector = Selector::parse(text)?;
        Ok::<_, Error>(command.build(flake, &selector, out_link).await?)
    };
    result.await.into()
}
