//! Clinician commands routed to the real-time thread.
//!
//! The alarm engine has a single owner, so acknowledge and silence requests
//! travel to it over the bounded command channel and the answer comes back on
//! a one-slot reply channel.

use crossbeam::channel::{self as xchannel, Sender};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::channels::{BoundedSender, ChannelError};
use crate::constants::realtime;
use crate::error::{Result, VitalsError};
use crate::models::{ActorRef, AlarmSnapshot};
use crate::monitoring::HealthMonitor;
use crate::state_machine::StateMachineResult;

#[derive(Debug)]
pub(crate) enum AlarmCommand {
    Acknowledge {
        alarm_id: Uuid,
        actor: ActorRef,
        reply: Sender<StateMachineResult<AlarmSnapshot>>,
    },
    Silence {
        alarm_id: Uuid,
        duration: Duration,
        reply: Sender<StateMachineResult<AlarmSnapshot>>,
    },
    ActiveAlarms {
        reply: Sender<Vec<AlarmSnapshot>>,
    },
    History {
        start_ms: i64,
        end_ms: i64,
        reply: Sender<Vec<AlarmSnapshot>>,
    },
}

/// Sending side used by the pipeline handle
#[derive(Debug, Clone)]
pub(crate) struct CommandClient {
    sender: BoundedSender<AlarmCommand>,
    health: Arc<HealthMonitor>,
    reply_timeout: Duration,
}

impl CommandClient {
    pub(crate) fn new(sender: BoundedSender<AlarmCommand>, health: Arc<HealthMonitor>) -> Self {
        Self {
            sender,
            health,
            reply_timeout: Duration::from_millis(realtime::COMMAND_REPLY_TIMEOUT_MS),
        }
    }

    pub(crate) fn acknowledge(&self, alarm_id: Uuid, actor: ActorRef) -> Result<AlarmSnapshot> {
        let result = self.request(|reply| AlarmCommand::Acknowledge {
            alarm_id,
            actor,
            reply,
        })?;
        Ok(result?)
    }

    pub(crate) fn silence(&self, alarm_id: Uuid, duration: Duration) -> Result<AlarmSnapshot> {
        let result = self.request(|reply| AlarmCommand::Silence {
            alarm_id,
            duration,
            reply,
        })?;
        Ok(result?)
    }

    pub(crate) fn active_alarms(&self) -> Result<Vec<AlarmSnapshot>> {
        self.request(|reply| AlarmCommand::ActiveAlarms { reply })
    }

    pub(crate) fn history(&self, start_ms: i64, end_ms: i64) -> Result<Vec<AlarmSnapshot>> {
        self.request(|reply| AlarmCommand::History {
            start_ms,
            end_ms,
            reply,
        })
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> AlarmCommand) -> Result<T> {
        let (reply_tx, reply_rx) = xchannel::bounded(1);
        match self.sender.send(build(reply_tx)) {
            Ok(_) => {}
            Err(ChannelError::Full(_)) => {
                self.health.record_channel_drop(self.sender.name(), 1);
                return Err(VitalsError::CapacityPressure {
                    channel: self.sender.name(),
                });
            }
            Err(ChannelError::Disconnected(_)) => {
                return Err(VitalsError::Shutdown(
                    "real-time thread is not accepting commands".to_string(),
                ));
            }
        }

        reply_rx.recv_timeout(self.reply_timeout).map_err(|e| {
            VitalsError::Shutdown(format!("real-time thread did not answer command: {e}"))
        })
    }
}
