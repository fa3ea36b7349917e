//! Typed reply adapters: convert a raw reply into a domain result, or a
//! typed failure synthesized from the reply's error signals.

use basalt_bson::{Document, Value};
use basalt_proto::Reply;

use crate::connection::ReplyCallback;
use crate::error::Error;

/// Inspects a reply for protocol-level failure signals: the flag bits
/// and the `ok`/`errmsg`/`code`/`$err` fields of the first document.
pub fn check_for_error(reply: &Reply) -> Result<(), Error> {
    if reply.cursor_not_found {
        return Err(Error::CursorNotFound(
            "server reported the cursor closed".to_string(),
        ));
    }
    if reply.shard_config_stale {
        return Err(Error::ShardConfigStale(
            "server reported a stale routing table".to_string(),
        ));
    }
    if reply.query_failed {
        return Err(server_error(reply.documents.first()));
    }
    if let Some(first) = reply.documents.first()
        && let Some(ok) = first.get_value("ok").and_then(Value::as_f64)
        && ok == 0.0
    {
        return Err(server_error(Some(first)));
    }
    Ok(())
}

/// Builds a *server-error* from `errmsg`, `code` and `$err`.
fn server_error(doc: Option<&Document>) -> Error {
    let Some(doc) = doc else {
        return Error::Server {
            code: None,
            message: "server reported a failure without details".to_string(),
        };
    };
    let message = doc
        .get_value("errmsg")
        .and_then(Value::as_str)
        .or_else(|| doc.get_value("$err").and_then(Value::as_str))
        .unwrap_or("server reported a failure without details")
        .to_string();
    let code = doc.get_value("code").and_then(Value::as_i32);
    Error::Server { code, message }
}

/// Adapts a callback expecting exactly one result document. Zero or
/// several documents fail with *reply-shape*.
pub fn single_document<F>(f: F) -> ReplyCallback
where
    F: FnOnce(Result<Document, Error>) + Send + 'static,
{
    Box::new(move |result| {
        f(result.and_then(|reply| {
            check_for_error(&reply)?;
            let mut documents = reply.documents;
            if documents.len() != 1 {
                return Err(Error::ReplyShape(format!(
                    "expected exactly one document, got {}",
                    documents.len()
                )));
            }
            Ok(documents.remove(0))
        }));
    })
}

/// Adapts a callback expecting the full result set.
pub fn documents<F>(f: F) -> ReplyCallback
where
    F: FnOnce(Result<Vec<Document>, Error>) + Send + 'static,
{
    Box::new(move |result| {
        f(result.and_then(|reply| {
            check_for_error(&reply)?;
            Ok(reply.documents)
        }));
    })
}

/// Adapts a callback expecting a named array in a single reply document.
pub fn named_array<F>(name: &'static str, f: F) -> ReplyCallback
where
    F: FnOnce(Result<Vec<Value>, Error>) + Send + 'static,
{
    single_document(move |result| {
        f(result.and_then(|doc| match doc.get_value(name) {
            Some(Value::Array(values)) => Ok(values.clone()),
            Some(_) => Err(Error::ReplyShape(format!("field {name:?} is not an array"))),
            None => Err(Error::ReplyShape(format!("reply has no {name:?} field"))),
        }));
    })
}

/// The default array adapter over the `values` field.
pub fn array<F>(f: F) -> ReplyCallback
where
    F: FnOnce(Result<Vec<Value>, Error>) + Send + 'static,
{
    named_array("values", f)
}

/// Adapts a callback expecting a cursor: the result documents plus the
/// cursor id to continue with.
pub fn cursor<F>(f: F) -> ReplyCallback
where
    F: FnOnce(Result<(Vec<Document>, i64), Error>) + Send + 'static,
{
    Box::new(move |result| {
        f(result.and_then(|reply| {
            check_for_error(&reply)?;
            let cursor_id = reply.cursor_id;
            Ok((reply.documents, cursor_id))
        }));
    })
}

/// Adapts a callback expecting an integer counter field.
pub fn integer<F>(field: &'static str, f: F) -> ReplyCallback
where
    F: FnOnce(Result<i64, Error>) + Send + 'static,
{
    single_document(move |result| {
        f(result.and_then(|doc| {
            doc.get_value(field).and_then(Value::as_i64).ok_or_else(|| {
                Error::ReplyShape(format!("reply has no numeric {field:?} field"))
            })
        }));
    })
}

/// Adapts a callback expecting the boolean `ok` acknowledgement.
pub fn ok_flag<F>(f: F) -> ReplyCallback
where
    F: FnOnce(Result<bool, Error>) + Send + 'static,
{
    single_document(move |result| {
        f(result.and_then(|doc| match doc.get_value("ok") {
            Some(Value::Boolean(ok)) => Ok(*ok),
            Some(value) => value
                .as_f64()
                .map(|ok| ok != 0.0)
                .ok_or_else(|| Error::ReplyShape("ok field is not numeric".to_string())),
            None => Err(Error::ReplyShape("reply has no ok field".to_string())),
        }));
    })
}
