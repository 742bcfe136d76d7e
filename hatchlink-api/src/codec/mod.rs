//! Line-delimited JSON codec spoken by the incubator controller.
//!
//! Every request is a single JSON object `{"cmd":"<name>", ...params}`
//! terminated by `\n`. Replies are one object per line; the firmware
//! occasionally emits stray bytes around the object, which [`decode`]
//! tolerates by falling back to the first balanced `{...}` span.

mod error;
mod scan;

pub use error::{CodecError, DecodeError};

use serde_json::{Map, Value};

use crate::message::{Command, Reply};

/// Key carrying the command name in every request
pub const COMMAND_KEY: &str = "cmd";

/// Line terminator of the wire protocol
pub const LINE_TERMINATOR: char = '\n';

/// Encodes `command` as one request line, terminator included.
///
/// Parameters keep their insertion order and their runtime JSON shape:
/// integers stay integers and floats always carry a fractional part.
pub fn encode(command: &Command) -> Result<String, CodecError> {
    if command.name().is_empty() {
        return Err(CodecError::EmptyCommand);
    }

    let mut object = Map::with_capacity(command.params().len() + 1);
    object.insert(COMMAND_KEY.into(), Value::String(command.name().to_owned()));

    for (key, value) in command.params() {
        if key == COMMAND_KEY {
            return Err(CodecError::ReservedKey(key.clone()));
        }
        object.insert(key.clone(), value.to_json(key)?);
    }

    let mut line = serde_json::to_string(&Value::Object(object))
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    line.push(LINE_TERMINATOR);

    Ok(line)
}

/// Decodes one raw reply line.
///
/// Never panics on malformed input: strict parsing is tried first, then the
/// first balanced object span is extracted and parsed.
pub fn decode(raw: &[u8]) -> Result<Reply, DecodeError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text) {
        return Ok(Reply::new(fields));
    }

    let span = scan::first_object(text).ok_or(DecodeError::NoObject)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(fields)) => Ok(Reply::new(fields)),
        Ok(_) => Err(DecodeError::NoObject),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}
