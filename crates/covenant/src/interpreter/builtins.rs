//! Built-in members of strings, arrays, and dictionaries.
//!
//! Strings treat user-perceived characters (grapheme clusters) as the
//! indexing unit throughout.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use unicode_segmentation::UnicodeSegmentation;

use crate::{
    interpreter::{
        errors::{RunResult, RuntimeError},
        value::{DictKey, Value, values_equal},
    },
    position::Span,
};

/// Grapheme cluster count of a string.
pub(crate) fn string_length(s: &str) -> usize {
    s.graphemes(true).count()
}

/// The grapheme cluster at a zero-based index.
pub(crate) fn grapheme_at(s: &str, index: &BigInt, span: Span) -> RunResult<String> {
    let index = index
        .to_usize()
        .ok_or_else(|| invalid_index(format!("string index {index} out of range"), span))?;
    s.graphemes(true)
        .nth(index)
        .map(str::to_string)
        .ok_or_else(|| invalid_index(format!("string index {index} out of range"), span))
}

fn invalid_index(message: String, span: Span) -> RuntimeError {
    RuntimeError::InvalidIndex { message, span }
}

/// Resolves a built-in member read. `length` is a plain value; the rest
/// become bound methods retaining receiver identity.
pub(crate) fn member(receiver: &Value, name: &str) -> Option<Value> {
    let method = |name: &str| {
        Some(Value::BuiltinMethod {
            receiver: Box::new(receiver.clone()),
            name: Rc::from(name),
        })
    };
    match receiver {
        Value::String(s) => match name {
            "length" => Some(Value::Int(BigInt::from(string_length(s)))),
            "concat" | "slice" => method(name),
            _ => None,
        },
        Value::Array(values) => match name {
            "length" => Some(Value::Int(BigInt::from(values.borrow().len()))),
            "append" | "concat" | "insert" | "remove" | "removeFirst" | "removeLast" | "contains" => method(name),
            _ => None,
        },
        Value::Dictionary(entries) => match name {
            "length" => Some(Value::Int(BigInt::from(entries.borrow().len()))),
            "remove" | "insert" => method(name),
            _ => None,
        },
        _ => None,
    }
}

/// Invokes a bound built-in method.
pub(crate) fn call(receiver: &Value, name: &str, mut arguments: Vec<Value>, span: Span) -> RunResult<Value> {
    match receiver {
        Value::String(s) => call_string(s, name, &arguments, span),
        Value::Array(values) => call_array(values, name, &mut arguments, span),
        Value::Dictionary(entries) => call_dictionary(entries, name, &mut arguments, span),
        other => Err(RuntimeError::invariant(
            format!("{} has no member `{name}`", other.kind_name()),
            span,
        )),
    }
}

fn call_string(s: &Rc<String>, name: &str, arguments: &[Value], span: Span) -> RunResult<Value> {
    match name {
        "concat" => {
            let other = match arguments.first() {
                Some(Value::String(other)) => other,
                _ => return Err(RuntimeError::invariant("concat expects a string", span)),
            };
            Ok(Value::string(format!("{s}{other}")))
        }
        "slice" => {
            let from = arguments
                .first()
                .ok_or_else(|| RuntimeError::invariant("slice expects `from`", span))?
                .as_int(span)?;
            let up_to = arguments
                .get(1)
                .ok_or_else(|| RuntimeError::invariant("slice expects `upTo`", span))?
                .as_int(span)?;
            // TODO: decide whether negative bounds should count from the
            // end; rejected until then
            let (Some(from), Some(up_to)) = (from.to_usize(), up_to.to_usize()) else {
                return Err(invalid_index("slice bounds out of range".to_string(), span));
            };
            let length = string_length(s);
            if from > up_to || up_to > length {
                return Err(invalid_index(
                    format!("slice bounds {from}..{up_to} out of range for length {length}"),
                    span,
                ));
            }
            let sliced: String = s.graphemes(true).skip(from).take(up_to - from).collect();
            Ok(Value::string(sliced))
        }
        _ => Err(RuntimeError::invariant(format!("String has no member `{name}`"), span)),
    }
}

fn call_array(
    values: &Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    arguments: &mut Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    let expect_argument = |arguments: &mut Vec<Value>| -> RunResult<Value> {
        if arguments.is_empty() {
            Err(RuntimeError::invariant(format!("`{name}` expects an argument"), span))
        } else {
            Ok(arguments.remove(0))
        }
    };
    match name {
        "append" => {
            let value = expect_argument(arguments)?;
            let value = if value.is_resource() { value } else { value.deep_copy() };
            values.borrow_mut().push(value);
            Ok(Value::Void)
        }
        "concat" => {
            // TODO: pin down the element type of concatenation with an
            // empty array; for now the result carries the other side's
            // elements unchanged
            let other = match expect_argument(arguments)? {
                Value::Array(other) => other,
                other => {
                    return Err(RuntimeError::invariant(
                        format!("concat expects an array, found {}", other.kind_name()),
                        span,
                    ));
                }
            };
            let mut combined: Vec<Value> = values.borrow().iter().map(Value::deep_copy).collect();
            combined.extend(other.borrow().iter().map(Value::deep_copy));
            Ok(Value::array(combined))
        }
        "insert" => {
            let at = expect_argument(arguments)?;
            let index = position_in(&at, values.borrow().len() + 1, span)?;
            let value = expect_argument(arguments)?;
            let value = if value.is_resource() { value } else { value.deep_copy() };
            values.borrow_mut().insert(index, value);
            Ok(Value::Void)
        }
        "remove" => {
            let at = expect_argument(arguments)?;
            let index = position_in(&at, values.borrow().len(), span)?;
            Ok(values.borrow_mut().remove(index))
        }
        "removeFirst" => {
            if values.borrow().is_empty() {
                return Err(invalid_index("removeFirst on an empty array".to_string(), span));
            }
            Ok(values.borrow_mut().remove(0))
        }
        "removeLast" => values
            .borrow_mut()
            .pop()
            .ok_or_else(|| invalid_index("removeLast on an empty array".to_string(), span)),
        "contains" => {
            let needle = expect_argument(arguments)?;
            let found = values.borrow().iter().any(|value| values_equal(value, &needle));
            Ok(Value::Bool(found))
        }
        _ => Err(RuntimeError::invariant(format!("Array has no member `{name}`"), span)),
    }
}

/// Converts an index argument into a position within `0..len`.
fn position_in(value: &Value, len: usize, span: Span) -> RunResult<usize> {
    let index = value.as_int(span)?;
    match index.to_usize() {
        Some(index) if index < len => Ok(index),
        _ => Err(invalid_index(format!("index {index} out of range"), span)),
    }
}

fn call_dictionary(
    entries: &Rc<std::cell::RefCell<indexmap::IndexMap<DictKey, Value>>>,
    name: &str,
    arguments: &mut Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match name {
        "remove" => {
            let key = arguments
                .first()
                .ok_or_else(|| RuntimeError::invariant("remove expects `key`", span))?;
            let key = DictKey::from_value(key, span)?;
            // shift-removal keeps the insertion order of the remaining
            // entries intact
            let removed = entries.borrow_mut().shift_remove(&key);
            Ok(match removed {
                Some(value) => Value::Some(Box::new(value)),
                None => Value::Nil,
            })
        }
        "insert" => {
            if arguments.len() < 2 {
                return Err(RuntimeError::invariant("insert expects `key` and a value", span));
            }
            let key = DictKey::from_value(&arguments[0], span)?;
            let value = arguments.remove(1);
            let value = if value.is_resource() { value } else { value.deep_copy() };
            let previous = entries.borrow_mut().insert(key, value);
            Ok(match previous {
                Some(value) => Value::Some(Box::new(value)),
                None => Value::Nil,
            })
        }
        _ => Err(RuntimeError::invariant(format!("Dictionary has no member `{name}`"), span)),
    }
}
