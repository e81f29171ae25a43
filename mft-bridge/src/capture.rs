//! Message capture: bulk inbox queries and live SMS broadcasts.

use mft_core::inbox::{InboxStore, SmsMessage};
use rusqlite::ErrorCode;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Sender, SyncSender};
use thiserror::Error;
use tracing::{debug, error};

pub const SMS_RECEIVED_ACTION: &str = "android.provider.Telephony.SMS_RECEIVED";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission to read messages denied")]
    PermissionDenied,
    #[error("message provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("failed to read messages: {0}")]
    Read(String),
}

/// Anything that can answer "messages dated at or after `start_date`".
pub trait MessageSource {
    fn query_inbox(&self, start_date: i64) -> Result<Vec<SmsMessage>, CaptureError>;
}

fn capture_error(err: rusqlite::Error) -> CaptureError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied => {
                CaptureError::PermissionDenied
            }
            ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                CaptureError::ProviderUnavailable(err.to_string())
            }
            _ => CaptureError::Read(err.to_string()),
        },
        _ => CaptureError::Read(err.to_string()),
    }
}

impl MessageSource for InboxStore {
    fn query_inbox(&self, start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        self.query_since(start_date).map_err(capture_error)
    }
}

/// Inbox database opened afresh for every query, so a missing or unreadable
/// database surfaces as a query failure rather than at construction.
#[derive(Clone, Debug)]
pub struct InboxProvider {
    path: PathBuf,
}

impl InboxProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageSource for InboxProvider {
    fn query_inbox(&self, start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        let store = InboxStore::open_existing(&self.path).map_err(capture_error)?;
        store.query_inbox(start_date)
    }
}

impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    fn query_inbox(&self, start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        (**self).query_inbox(start_date)
    }
}

/// Bulk inbox reader.
pub struct MessageCapture<S> {
    source: S,
}

impl<S: MessageSource> MessageCapture<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Messages with `date >= start_date`, newest first, or the cause of failure.
    pub fn fetch(&self, start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        let mut messages = self.source.query_inbox(start_date)?;
        messages.retain(|m| m.date >= start_date);
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(messages)
    }

    /// Same as [`fetch`](Self::fetch) but any failure reads as an empty inbox.
    pub fn get_all_messages(&self, start_date: i64) -> Vec<SmsMessage> {
        self.fetch(start_date).unwrap_or_else(|err| {
            debug!(error = %err, "returning empty message list");
            Vec::new()
        })
    }
}

#[derive(Debug, Error)]
#[error("dispatch channel closed")]
pub struct DispatchError;

/// Hands a captured message to whatever context owns the downstream channel.
pub trait Dispatcher {
    fn post(&self, message: SmsMessage) -> Result<(), DispatchError>;
}

impl Dispatcher for Sender<SmsMessage> {
    fn post(&self, message: SmsMessage) -> Result<(), DispatchError> {
        self.send(message).map_err(|_| DispatchError)
    }
}

impl Dispatcher for SyncSender<SmsMessage> {
    fn post(&self, message: SmsMessage) -> Result<(), DispatchError> {
        self.send(message).map_err(|_| DispatchError)
    }
}

/// One decoded message inside a broadcast.
#[derive(Clone, Debug, Default)]
pub struct IncomingSms {
    pub originating_address: Option<String>,
    pub body: Option<String>,
    pub timestamp_millis: i64,
}

/// A system notification as delivered to the receiver.
#[derive(Clone, Debug)]
pub struct Broadcast {
    pub action: String,
    pub messages: Vec<IncomingSms>,
}

impl Broadcast {
    pub fn sms_received(messages: Vec<IncomingSms>) -> Self {
        Self {
            action: SMS_RECEIVED_ACTION.to_string(),
            messages,
        }
    }
}

/// Live capture of incoming messages.
pub struct SmsReceiver<D> {
    dispatcher: D,
}

impl<D: Dispatcher> SmsReceiver<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    /// Forward every message of an SMS broadcast. Returns how many were
    /// delivered; failures are logged only.
    pub fn on_receive(&self, broadcast: &Broadcast) -> usize {
        if broadcast.action != SMS_RECEIVED_ACTION {
            return 0;
        }

        let mut delivered = 0;
        for sms in &broadcast.messages {
            let sender = sms.originating_address.as_deref().unwrap_or("Unknown");
            let body = sms.body.as_deref().unwrap_or("");
            let preview: String = body.chars().take(50).collect();
            debug!(sender, "new SMS: {}...", preview);

            let message = SmsMessage::new(sender, body, sms.timestamp_millis);
            match self.dispatcher.post(message) {
                Ok(()) => delivered += 1,
                Err(err) => error!(error = %err, sender, "error processing SMS"),
            }
        }
        delivered
    }
}
