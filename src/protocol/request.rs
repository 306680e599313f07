/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::utils::encode_text;
use std::fmt::Display;

/// Builds the `key=value&key=value` parameter string of one TLCP sub-request.
///
/// Values are percent-encoded; keys are emitted verbatim.
#[derive(Debug, Default, Clone)]
pub(crate) struct RequestBuilder {
    buf: String,
}

impl RequestBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends one parameter.
    pub(crate) fn param(mut self, key: &str, value: impl Display) -> Self {
        if !self.buf.is_empty() {
            self.buf.push('&');
        }
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(&encode_text(&value.to_string()));
        self
    }

    /// Appends the parameter only when a value is present.
    pub(crate) fn param_opt<T: Display>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded parameter string.
    pub(crate) fn encode(self) -> String {
        self.buf
    }
}

/// One wire request produced by [`batch_requests`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Batch {
    pub body: String,
    /// How many of the input sub-requests went into `body`, in order.
    pub count: usize,
}

/// Joins sub-requests with `\r\n` into as few batches as `limit` allows.
///
/// `header` is prepended to every batch (the WebSocket verb line, empty over
/// HTTP). A `limit` of zero means unlimited. A sub-request that alone exceeds
/// the limit is still sent, in a batch of its own.
pub(crate) fn batch_requests(header: &str, requests: &[String], limit: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Option<Batch> = None;
    for request in requests {
        if let Some(batch) = current.as_mut() {
            let len = batch.body.len() + 2 + request.len();
            if limit == 0 || len <= limit {
                batch.body.push_str("\r\n");
                batch.body.push_str(request);
                batch.count += 1;
                continue;
            }
        }
        if let Some(done) = current.take() {
            batches.push(done);
        }
        current = Some(Batch {
            body: format!("{}{}", header, request),
            count: 1,
        });
    }
    if let Some(done) = current {
        batches.push(done);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_encodes_values() {
        let body = RequestBuilder::new()
            .param("LS_op", "add")
            .param("LS_group", "item1 item2")
            .param("LS_snapshot", true)
            .param_opt::<u32>("LS_requested_buffer_size", None)
            .param_opt("LS_reqId", Some(7))
            .encode();
        assert_eq!(
            body,
            "LS_op=add&LS_group=item1%20item2&LS_snapshot=true&LS_reqId=7"
        );
    }

    #[test]
    fn test_builder_empty() {
        assert!(RequestBuilder::new().is_empty());
        assert_eq!(RequestBuilder::new().encode(), "");
    }

    #[test]
    fn test_batching_respects_limit() {
        let requests = vec!["a=1".to_string(), "b=2".to_string(), "c=3".to_string()];
        let batches = batch_requests("control\r\n", &requests, 20);
        assert_eq!(
            batches,
            vec![
                Batch {
                    body: "control\r\na=1\r\nb=2".to_string(),
                    count: 2
                },
                Batch {
                    body: "control\r\nc=3".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_batching_unlimited_and_oversize() {
        let requests = vec!["x".repeat(30), "y=1".to_string()];
        let unlimited = batch_requests("", &requests, 0);
        assert_eq!(unlimited.len(), 1);
        assert_eq!(unlimited[0].count, 2);

        let limited = batch_requests("", &requests, 10);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].body.len(), 30);
        assert_eq!(limited[1].body, "y=1");
    }

    #[test]
    fn test_batching_nothing() {
        assert!(batch_requests("msg\r\n", &[], 100).is_empty());
    }
}
