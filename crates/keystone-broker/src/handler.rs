//! Subscription callbacks and their typed adapters.
//!
//! Subscriptions work on raw bytes. [`use_case`] and [`subscriber`] lift a
//! typed `async fn(Context, In)` into those byte-level callbacks, decoding
//! the JSON payload on the way in and encoding the result on the way out.
//! A domain error from a use case is itself the reply, encoded as
//! `{"status":..,"code":..,"message":..}`; [`decode_reply`] turns it back
//! into an error on the requesting side.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use keystone_core::{AppError, BoxFuture, Context, Error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Callback answering request/reply operations.
pub trait OperationHandler: Send + Sync + 'static {
    /// Produces the reply for one request.
    fn handle(&self, context: Context, payload: Bytes) -> BoxFuture<'static, Result<Bytes, Error>>;
}

impl<F, Fut> OperationHandler for F
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Error>> + Send + 'static,
{
    fn handle(&self, context: Context, payload: Bytes) -> BoxFuture<'static, Result<Bytes, Error>> {
        Box::pin(self(context, payload))
    }
}

/// Callback consuming fire-and-forget events.
pub trait EventHandler: Send + Sync + 'static {
    /// Processes one event.
    fn handle(&self, context: Context, payload: Bytes) -> BoxFuture<'static, Result<(), Error>>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle(&self, context: Context, payload: Bytes) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(self(context, payload))
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(payload)
        .map_err(|err| Error::internal_with_source("failed to decode payload", err))
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, Error> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| Error::internal_with_source("failed to encode reply", err))
}

/// Adapts a typed use case into an [`OperationHandler`].
///
/// # Example
///
/// ```rust
/// use keystone_broker::{decode_reply, use_case, OperationHandler};
/// use keystone_core::{AppError, Context};
///
/// # tokio_test::block_on(async {
/// let double = use_case(|_ctx, n: i64| async move {
///     if n < 0 {
///         return Err(AppError::query_invalid("negative"));
///     }
///     Ok(n * 2)
/// });
///
/// let reply = double.handle(Context::new(), "21".into()).await.unwrap();
/// assert_eq!(decode_reply::<i64>(&reply).unwrap(), 42);
///
/// let reply = double.handle(Context::new(), "-1".into()).await.unwrap();
/// assert!(decode_reply::<i64>(&reply).is_err());
/// # });
/// ```
pub fn use_case<In, Out, F, Fut>(func: F) -> impl OperationHandler
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(Context, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, AppError>> + Send + 'static,
{
    let func = Arc::new(func);
    move |context: Context, payload: Bytes| {
        let func = Arc::clone(&func);
        async move {
            let input = decode::<In>(&payload)?;
            match func(context, input).await {
                Ok(output) => encode(&output),
                Err(err) => encode(&err),
            }
        }
    }
}

/// Adapts a typed event consumer into an [`EventHandler`].
pub fn subscriber<In, F, Fut>(func: F) -> impl EventHandler
where
    In: DeserializeOwned + Send + 'static,
    F: Fn(Context, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let func = Arc::new(func);
    move |context: Context, payload: Bytes| {
        let func = Arc::clone(&func);
        async move {
            let input = decode::<In>(&payload)?;
            func(context, input).await.map_err(Error::from)
        }
    }
}

/// Decodes a reply, surfacing an encoded domain error as [`Error::App`].
///
/// A reply is treated as a domain error when it is a JSON object whose keys
/// are exactly the [`AppError`] fields.
pub fn decode_reply<T: DeserializeOwned>(reply: &[u8]) -> Result<T, Error> {
    let value: Value = decode(reply)?;
    if looks_like_app_error(&value) {
        if let Ok(err) = serde_json::from_value::<AppError>(value.clone()) {
            return Err(Error::App(err));
        }
    }
    serde_json::from_value(value)
        .map_err(|err| Error::internal_with_source("failed to decode reply", err))
}

fn looks_like_app_error(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    map.get("status").is_some_and(Value::is_u64)
        && map.get("code").is_some_and(Value::is_string)
        && map.get("message").is_some_and(Value::is_string)
        && map
            .keys()
            .all(|key| matches!(key.as_str(), "status" | "code" | "message" | "data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    #[tokio::test]
    async fn test_use_case_encodes_domain_error() {
        let find = use_case(|_ctx, id: u64| async move {
            Err::<User, _>(AppError::query_not_found(format!("user {id} not found")))
        });

        let reply = find.handle(Context::new(), Bytes::from_static(b"7")).await.unwrap();
        let json: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(json["code"], "query.001");
        assert_eq!(json["status"], 404);

        let err = decode_reply::<User>(&reply).unwrap_err();
        assert!(err.as_app().is_some_and(AppError::is_query_not_found));
    }

    #[tokio::test]
    async fn test_use_case_rejects_bad_payload() {
        let find = use_case(|_ctx, id: u64| async move { Ok::<_, AppError>(id) });
        let err = find
            .handle(Context::new(), Bytes::from_static(b"not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn test_subscriber_passes_typed_input() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let handler = subscriber(move |_ctx, user: User| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock() = Some(user);
                Ok(())
            }
        });

        handler
            .handle(Context::new(), Bytes::from_static(br#"{"id":1,"name":"ada"}"#))
            .await
            .unwrap();
        assert_eq!(
            *seen.lock(),
            Some(User {
                id: 1,
                name: "ada".into()
            })
        );
    }

    #[test]
    fn test_decode_reply_keeps_lookalikes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Ticket {
            status: u64,
            code: String,
            message: String,
            seat: u32,
        }

        let ticket: Ticket =
            decode_reply(br#"{"status":1,"code":"A","message":"ok","seat":4}"#).unwrap();
        assert_eq!(ticket.seat, 4);
    }
}
