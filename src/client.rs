use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregator::MessageAggregator;
use crate::error::ClientError;
use crate::lifecycle::{TaskLifecycle, TaskState};
use crate::message::MessageIdAllocator;
use crate::observer::TaskObserver;
use crate::profile::ServiceProfile;
use crate::run::{CancelSignal, DeliveryGate, RunDriver, RunStatus};
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::transport::{StartRequest, StreamHandle, TaskApi, Transport};

struct ActiveRun {
    handle: StreamHandle,
    cancel: CancelSignal,
    status: Arc<Mutex<RunStatus>>,
    delivery: Arc<DeliveryGate>,
    task: JoinHandle<()>,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        let status = lock_unpoisoned(&self.status);
        !status.lifecycle.is_terminated() && !status.connection.is_final()
    }

    /// Stop the driver. The caller waits on the returned gate once it no
    /// longer holds the client's lock, after which no callback for this run
    /// is delivered.
    fn shut_down(&self) -> Arc<DeliveryGate> {
        {
            let mut status = lock_unpoisoned(&self.status);
            self.cancel.store(true, Ordering::Release);
            status.connection = ConnectionState::Closed;
            status.lifecycle.cancel();
        }
        self.task.abort();
        debug!(handle = %self.handle, "run closed");
        Arc::clone(&self.delivery)
    }
}

/// Unified client for one task service.
///
/// At most one run is active at a time; starting a new run force-closes the
/// previous one. Must be used from within a tokio runtime.
pub struct EventStreamClient {
    profile: ServiceProfile,
    api: Arc<dyn TaskApi>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn TaskObserver>,
    ids: Arc<MessageIdAllocator>,
    active: Mutex<Option<ActiveRun>>,
}

impl EventStreamClient {
    pub fn new(
        profile: ServiceProfile,
        api: Arc<dyn TaskApi>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn TaskObserver>,
    ) -> Self {
        let ids = Arc::new(MessageIdAllocator::new(profile.id_prefix.clone()));
        Self {
            profile,
            api,
            transport,
            observer,
            ids,
            active: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    /// Launch a run and begin streaming its events.
    pub async fn start(&self, request: StartRequest) -> Result<StreamHandle, ClientError> {
        self.close();

        let handle = self.api.start(request).await.map_err(ClientError::Start)?;
        info!(handle = %handle, prefix = %self.profile.id_prefix, "task started");

        let cancel = CancelSignal::default();
        let status = Arc::new(Mutex::new(RunStatus::new(TaskLifecycle::new(self.profile.settle))));
        let delivery = Arc::new(DeliveryGate::default());
        let driver = RunDriver {
            handle: handle.clone(),
            transport: Arc::clone(&self.transport),
            observer: Arc::clone(&self.observer),
            aggregator: MessageAggregator::new(Arc::clone(&self.ids))
                .with_completion_summary(self.profile.completion_prefers_result_summary),
            supervisor: ConnectionSupervisor::new(self.profile.reconnect),
            cancel: Arc::clone(&cancel),
            status: Arc::clone(&status),
            delivery: Arc::clone(&delivery),
        };
        let task = tokio::spawn(driver.run());

        // A concurrent start may have won the race; the later run replaces it.
        let previous = lock_unpoisoned(&self.active).replace(ActiveRun {
            handle: handle.clone(),
            cancel,
            status,
            delivery,
            task,
        });
        if let Some(previous) = previous {
            previous.shut_down().wait_idle();
        }
        Ok(handle)
    }

    pub async fn start_command(&self, command: impl Into<String>) -> Result<StreamHandle, ClientError> {
        self.start(StartRequest::new(command)).await
    }

    /// Close the local stream without notifying the server.
    ///
    /// Idempotent. Returns true when a live run was closed.
    pub fn close(&self) -> bool {
        let (was_live, delivery) = {
            let active = lock_unpoisoned(&self.active);
            let Some(run) = active.as_ref() else {
                return false;
            };
            (run.is_live(), run.shut_down())
        };
        delivery.wait_idle();
        was_live
    }

    /// Close the local stream, then ask the server to stop producing.
    ///
    /// The local side is closed even when the cancel request fails.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        let handle = lock_unpoisoned(&self.active)
            .as_ref()
            .filter(|run| run.is_live())
            .map(|run| run.handle.clone());
        let Some(handle) = handle else {
            self.close();
            return Err(ClientError::NoActiveRun);
        };

        self.close();
        self.api.cancel(&handle).await.map_err(|error| {
            warn!(handle = %handle, %error, "cancel request failed");
            ClientError::Cancel(error)
        })
    }

    /// Answer an ASK_USER prompt of the live run.
    pub async fn respond(&self, event_id: &str, response: &str) -> Result<(), ClientError> {
        let handle = self.handle().ok_or(ClientError::NoActiveRun)?;
        self.api
            .respond(&handle, event_id, response)
            .await
            .map_err(|source| ClientError::Respond {
                event_id: event_id.to_owned(),
                source,
            })
    }

    /// Handle of the live run. `None` once the run terminated or was closed.
    pub fn handle(&self) -> Option<StreamHandle> {
        lock_unpoisoned(&self.active)
            .as_ref()
            .filter(|run| run.is_live())
            .map(|run| run.handle.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock_unpoisoned(&self.active)
            .as_ref()
            .map_or(ConnectionState::Idle, |run| lock_unpoisoned(&run.status).connection)
    }

    pub fn task_state(&self) -> TaskState {
        lock_unpoisoned(&self.active)
            .as_ref()
            .map_or(TaskState::Idle, |run| lock_unpoisoned(&run.status).lifecycle.state())
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
