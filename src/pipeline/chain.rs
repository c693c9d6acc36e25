//! Transfer chain plumbing
//!
//! Every stage output of a transfer is tapped by one shared [`Settlement`].
//! The first error any stage raises is kept with its original `io::Error`;
//! later errors are ignored. Downstream stages only see a copy of the error,
//! so whatever they do with it cannot replace the original.

use crate::adapter::{ByteStream, WriteStream};
use crate::error::{Stage, TransferError};
use futures::StreamExt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// First-error-wins outcome slot shared by every stage of one transfer
#[derive(Clone, Default)]
pub(crate) struct Settlement {
    error: Arc<Mutex<Option<TransferError>>>,
}

impl Settlement {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless an earlier one was recorded; returns whether it was kept
    pub(crate) fn record(&self, error: TransferError) -> bool {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::trace!(stage = %error.stage, %error, "Ignoring error after settlement");
            return false;
        }
        tracing::debug!(stage = %error.stage, %error, "Transfer error recorded");
        *slot = Some(error);
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn take(&self) -> Option<TransferError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Record errors leaving `stream` against `stage`
pub(crate) fn tap(stream: ByteStream, stage: Stage, settlement: Settlement) -> ByteStream {
    Box::pin(stream.map(move |item| match item {
        Ok(chunk) => Ok(chunk),
        Err(err) => {
            let forwarded = io::Error::new(err.kind(), err.to_string());
            settlement.record(TransferError::new(stage.clone(), err));
            Err(forwarded)
        }
    }))
}

/// Pump `stream` into `sink` and close it
///
/// The sink is only closed (committed) when no stage failed. Returns the number
/// of bytes written.
pub(crate) async fn drive(
    mut stream: ByteStream,
    mut sink: Box<dyn WriteStream>,
    settlement: Settlement,
) -> Result<u64, TransferError> {
    let mut written = 0u64;
    let mut unrecorded = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                // A stage may have swallowed an upstream error and carried on
                if settlement.is_settled() {
                    break;
                }
                let len = chunk.len() as u64;
                if let Err(err) = sink.write(chunk).await {
                    settlement.record(TransferError::new(Stage::Sink, err));
                    break;
                }
                written += len;
            }
            Err(err) => {
                unrecorded = Some(err);
                break;
            }
        }
    }

    if let Some(err) = unrecorded {
        // Taps record everything; this only fires for a bare, untapped stream
        settlement.record(TransferError::new(Stage::Source, err));
    }

    if !settlement.is_settled() {
        if let Err(err) = sink.close().await {
            settlement.record(TransferError::new(Stage::Sink, err));
        }
    }

    match settlement.take() {
        Some(err) => Err(err),
        None => Ok(written),
    }
}
