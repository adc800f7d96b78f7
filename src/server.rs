// Copyright 2020 Joyent, Inc.

//! Dispatch of inbound requests to registered handlers.
//!
//! Handlers are registered per facade type and method name and receive the
//! facade instance id from the request header along with the decoded
//! parameters. Every request resolves to exactly one outcome: the handler's
//! response, the handler's error, or an error produced here when the method
//! is unknown, the parameters do not decode, or the handler panics.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec::RawBody;
use crate::error::RequestError;
use crate::header::Header;

type Handler<B> =
    Arc<dyn Fn(String, B) -> BoxFuture<'static, Result<Value, RequestError>> + Send + Sync>;
type ErrorTransform = Arc<dyn Fn(RequestError) -> RequestError + Send + Sync>;

/// The set of facades a connection serves.
pub struct Server<B> {
    facades: HashMap<String, HashMap<String, Handler<B>>>,
    transform: Option<ErrorTransform>,
}

impl<B: RawBody> Default for Server<B> {
    fn default() -> Self {
        Server::new()
    }
}

impl<B: RawBody> Server<B> {
    pub fn new() -> Server<B> {
        Server {
            facades: HashMap::new(),
            transform: None,
        }
    }

    /// Register `handler` for `method` on `facade`, replacing any earlier
    /// registration.
    pub fn register<P, R, F, Fut>(&mut self, facade: &str, method: &str, handler: F) -> &mut Self
    where
        P: DeserializeOwned + Default + Send + 'static,
        R: Serialize + 'static,
        F: Fn(String, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RequestError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: Handler<B> = Arc::new(move |id: String, body: B| {
            let handler = Arc::clone(&handler);
            async move {
                let params: P = body.decode().map_err(|e| {
                    RequestError::bad_request(format!("cannot decode parameters: {}", e))
                })?;
                let response = handler(id, params).await?;
                serde_json::to_value(response).map_err(|e| {
                    RequestError::internal(format!("cannot encode response: {}", e))
                })
            }
            .boxed()
        });
        self.facades
            .entry(facade.to_string())
            .or_default()
            .insert(method.to_string(), erased);
        self
    }

    /// Pass every error produced while serving a request through `transform`
    /// before it is written back.
    pub fn with_error_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(RequestError) -> RequestError + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn serves(&self, facade: &str, method: &str) -> bool {
        self.lookup(facade, method).is_ok()
    }

    fn lookup(&self, facade: &str, method: &str) -> Result<&Handler<B>, RequestError> {
        let methods = self.facades.get(facade).ok_or_else(|| {
            RequestError::not_implemented(format!("unknown object type {:?}", facade))
        })?;
        methods.get(method).ok_or_else(|| {
            RequestError::not_implemented(format!(
                "no such request - method {}.{} is not implemented",
                facade, method
            ))
        })
    }

    /// Resolve the request named by `header` and return a future producing
    /// its outcome. The future never panics.
    pub fn dispatch(
        &self,
        header: &Header,
        body: B,
    ) -> BoxFuture<'static, Result<Value, RequestError>> {
        let outcome = match self.lookup(&header.facade, &header.request) {
            Ok(handler) => {
                let handler = Arc::clone(handler);
                let id = header.id.clone();
                AssertUnwindSafe(async move { handler(id, body).await })
                    .catch_unwind()
                    .map(|res| res.unwrap_or_else(|panic| Err(panicked(panic))))
                    .boxed()
            }
            Err(err) => future::ready(Err(err)).boxed(),
        };
        match self.transform.clone() {
            Some(transform) => outcome.map(move |res| res.map_err(|e| transform(e))).boxed(),
            None => outcome,
        }
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> RequestError {
    let reason = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    RequestError::internal(format!("handler panicked: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::jsoncodec::JsonBody;
    use serde_derive::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Sum {
        a: i64,
        b: i64,
    }

    fn body(raw: &str) -> JsonBody {
        JsonBody::new(Some(serde_json::value::RawValue::from_string(raw.to_string()).unwrap()))
    }

    fn server() -> Server<JsonBody> {
        let mut server = Server::new();
        server
            .register("Adder", "Add", |_id, p: Sum| async move {
                Ok::<_, RequestError>(p.a + p.b)
            })
            .register("Adder", "Whoami", |id: String, _: ()| async move {
                Ok::<_, RequestError>(id)
            })
            .register("Adder", "Fail", |_id, _: ()| async move {
                Err::<(), _>(RequestError::new("no can do", "unauthorized"))
            })
            .register("Adder", "Panic", |_id, _: ()| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<(), RequestError>(())
            });
        server
    }

    #[tokio::test]
    async fn dispatches_to_handler() {
        let server = server();
        let hdr = Header::request(1, "Adder", "adder-0", "Add");
        let res = server.dispatch(&hdr, body(r#"{"a":2,"b":40}"#)).await;
        assert_eq!(res, Ok(json!(42)));

        let hdr = Header::request(2, "Adder", "adder-0", "Whoami");
        let res = server.dispatch(&hdr, JsonBody::default()).await;
        assert_eq!(res, Ok(json!("adder-0")));
    }

    #[tokio::test]
    async fn unknown_facade_and_method_are_not_implemented() {
        let server = server();
        let res = server
            .dispatch(&Header::request(1, "Subtracter", "", "Sub"), JsonBody::default())
            .await;
        assert_eq!(res.unwrap_err().code, codes::NOT_IMPLEMENTED);

        let res = server
            .dispatch(&Header::request(1, "Adder", "", "Sub"), JsonBody::default())
            .await;
        let err = res.unwrap_err();
        assert_eq!(err.code, codes::NOT_IMPLEMENTED);
        assert!(err.message.contains("Adder.Sub"));
        assert!(!server.serves("Adder", "Sub"));
        assert!(server.serves("Adder", "Add"));
    }

    #[tokio::test]
    async fn bad_params_do_not_reach_handler() {
        let server = server();
        let hdr = Header::request(1, "Adder", "", "Add");
        let res = server.dispatch(&hdr, body(r#"{"a":"two"}"#)).await;
        assert_eq!(res.unwrap_err().code, codes::BAD_REQUEST);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_become_replies() {
        let server = server();
        let res = server
            .dispatch(&Header::request(1, "Adder", "", "Fail"), JsonBody::default())
            .await;
        assert_eq!(res, Err(RequestError::new("no can do", "unauthorized")));

        let res = server
            .dispatch(&Header::request(2, "Adder", "", "Panic"), JsonBody::default())
            .await;
        let err = res.unwrap_err();
        assert_eq!(err.code, codes::INTERNAL);
        assert!(err.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn error_transform_applies_to_every_failure() {
        let server = server().with_error_transform(|mut e| {
            e.message = format!("adder: {}", e.message);
            e
        });
        let res = server
            .dispatch(&Header::request(1, "Adder", "", "Fail"), JsonBody::default())
            .await;
        assert_eq!(res.unwrap_err().message, "adder: no can do");

        let res = server
            .dispatch(&Header::request(1, "Nope", "", "Fail"), JsonBody::default())
            .await;
        assert!(res.unwrap_err().message.starts_with("adder: unknown object type"));
    }
}
