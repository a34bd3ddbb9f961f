//! System event monitor.
//!
//! Watches the system bus for events that can silently undo the link
//! binding and turns them into a single "reapply" notification:
//!
//! * **`PrepareForSleep(false)`** from logind: the host resumed.
//! * **`PropertiesChanged`** on the resolved manager whose `DNS` list no
//!   longer mentions our link: something reconfigured the host resolver.
//!
//! The monitor runs on its own connection in monitor mode, since
//! `BecomeMonitor` changes how the whole connection receives messages.

use std::collections::HashMap;

use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use zbus::fdo::MonitoringProxy;
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::error::Result;
use crate::resolver::resolve1::{RESOLVE1_MANAGER_INTERFACE, RESOLVE1_PATH};
use crate::types::MonitoredEvent;

pub const LOGIN1_MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Incoming bus messages buffered on the monitor connection.
const MONITOR_QUEUE_CAPACITY: usize = 16;

/// Sending half of the reapply channel.
///
/// The channel holds a single pending notification; anything sent while
/// one is pending is dropped.
#[derive(Debug, Clone)]
pub struct ReapplySignal {
    tx: mpsc::Sender<()>,
}

impl ReapplySignal {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Returns `true` if a new notification was queued.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Reapply already pending");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Reapply receiver gone");
                false
            }
        }
    }
}

/// Decodes a bus message into a [`MonitoredEvent`].
///
/// `own_link` is the link index currently bound. Messages that are not
/// one of the two watched signals, or that lack path, interface or
/// member headers, yield `None`.
pub fn classify(msg: &Message, own_link: Option<i32>) -> Option<MonitoredEvent> {
    let header = msg.header();
    let (Some(path), Some(interface), Some(member)) =
        (header.path(), header.interface(), header.member())
    else {
        return None;
    };

    match (interface.as_str(), member.as_str()) {
        (LOGIN1_MANAGER_INTERFACE, "PrepareForSleep") => match msg.body().deserialize::<bool>() {
            Ok(suspending) => Some(MonitoredEvent::SuspendResume {
                resuming: !suspending,
            }),
            Err(e) => {
                warn!("Malformed PrepareForSleep signal: {}", e);
                None
            }
        },
        (PROPERTIES_INTERFACE, "PropertiesChanged") if path.as_str() == RESOLVE1_PATH => {
            resolver_properties_changed(msg, own_link)
        }
        _ => None,
    }
}

fn resolver_properties_changed(msg: &Message, own_link: Option<i32>) -> Option<MonitoredEvent> {
    let body = msg.body();
    let (interface, changed, _invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
        match body.deserialize() {
            Ok(args) => args,
            Err(e) => {
                warn!("Malformed PropertiesChanged signal: {}", e);
                return None;
            }
        };

    if interface != RESOLVE1_MANAGER_INTERFACE {
        return None;
    }
    let dns = changed.get("DNS")?;

    let Some(links) = dns_link_indexes(dns) else {
        warn!("Ignoring DNS property with unexpected shape: {:?}", dns);
        return None;
    };
    let link_present = own_link.is_some_and(|own| links.contains(&own));
    Some(MonitoredEvent::ResolverPropertiesChanged { link_present })
}

/// Link indexes of an `a(iiay)` `DNS` property value.
pub fn dns_link_indexes(value: &Value<'_>) -> Option<Vec<i32>> {
    let Value::Array(entries) = value else {
        return None;
    };
    entries
        .iter()
        .map(|entry| match entry {
            Value::Structure(fields) => match fields.fields() {
                [Value::I32(link), Value::I32(_family), _address] => Some(*link),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Match rules for the two watched signals.
fn match_rules() -> Result<Vec<MatchRule<'static>>> {
    let sleep = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(LOGIN1_MANAGER_INTERFACE)?
        .member("PrepareForSleep")?
        .build();
    let properties = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .path(RESOLVE1_PATH)?
        .interface(PROPERTIES_INTERFACE)?
        .member("PropertiesChanged")?
        .build();
    Ok(vec![sleep, properties])
}

/// A system bus connection in monitor mode.
pub struct SystemEventMonitor {
    conn: Connection,
}

impl SystemEventMonitor {
    /// Opens a private system bus connection and turns it into a monitor.
    pub async fn connect() -> Result<Self> {
        let conn = zbus::connection::Builder::system()?
            .max_queued(MONITOR_QUEUE_CAPACITY)
            .build()
            .await?;

        let rules = match_rules()?;
        MonitoringProxy::new(&conn)
            .await?
            .become_monitor(&rules, 0)
            .await?;
        info!("Monitoring system bus for sleep and resolver changes");

        Ok(Self { conn })
    }

    /// Drains the connection on a background task, notifying `signal`
    /// whenever the binding needs to be applied again. The bound link
    /// index is read from `links` for each message.
    pub fn spawn(
        self,
        links: watch::Receiver<Option<i32>>,
        signal: ReapplySignal,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut stream = MessageStream::from(self.conn);
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Failed to read bus message: {}", e);
                        continue;
                    }
                };
                let own_link = *links.borrow();
                if let Some(event) = classify(&msg, own_link) {
                    debug!("Bus event: {:?}", event);
                    if event.needs_reapply() && signal.notify() {
                        info!("Binding may be stale ({:?}), requesting reapply", event);
                    }
                }
            }
            warn!("System bus monitor stream ended");
        })
    }
}
