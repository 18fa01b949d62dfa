//! Refetches queries once a call succeeded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::CallOptions;
use super::dispatch;
use crate::cache::CacheControl;
use crate::client::ClientContext;
use crate::error::ApolloError;
use crate::operation::Operation;
use crate::operation::OperationName;

/// Outstanding refetches started by one call.
pub(crate) struct QueryRefetcher {
    cancellation: CancellationToken,
}

impl QueryRefetcher {
    /// Refetch `operations` from the network and ask the active watchers of `names` to refetch.
    ///
    /// Refetches are fire-and-forget: failures are logged and never reach the call. Canceling
    /// `parent` cancels them.
    pub(crate) fn start(
        context: &Arc<ClientContext>,
        operations: &[Arc<Operation>],
        names: &[OperationName],
        parent: &CancellationToken,
    ) -> Self {
        let cancellation = parent.child_token();

        for operation in operations {
            let options = CallOptions::new(operation.clone(), CacheControl::NetworkOnly);
            let guard = context.tracker.track_call();
            let task_context = context.clone();
            let token = cancellation.clone();
            let span = tracing::info_span!("apollo.refetch", operation = %operation.name());
            context.dispatcher.spawn(
                async move {
                    let _guard = guard;
                    match dispatch(&task_context, &options, &token).await {
                        Ok(_) | Err(ApolloError::Canceled) => {}
                        Err(error) => tracing::warn!("failed to refetch query: {error}"),
                    }
                }
                .instrument(span),
            );
        }

        for watcher in context.tracker.active_watchers(names) {
            watcher.refetch();
        }

        Self { cancellation }
    }

    pub(crate) fn cancel(&self) {
        self.cancellation.cancel();
    }
}
