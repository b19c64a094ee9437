//! Scripted relay simulation.
//!
//! Reads one JSON step per line and drives an in-process auth provider,
//! change feed and console notification facility through the real relay.
//! Relay bus events are printed to stdout as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use horo_relay::{
    feed::MemoryFeed,
    router::LogHandler,
    session::{AuthProvider, MemoryAuth, SessionGate},
    sink::{self, NotificationFacility},
    theme::ThemeProvider,
    Relay, RelayDeps,
};
use horo_types::{
    config::{HoroConfig, Platform},
    identity::Identity,
    notification::NotificationData,
    resource::{ChangeOperation, ResourceClass},
};

use crate::console::ConsoleFacility;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    SignIn {
        user: String,
    },
    SignOut,
    Expire,
    Change {
        user: String,
        resource: ResourceClass,
        operation: ChangeOperation,
        #[serde(default)]
        payload: Value,
    },
    Tap {
        resource: ResourceClass,
        #[serde(default)]
        payload: Value,
    },
    Wait {
        ms: u64,
    },
}

pub struct Options {
    pub platform: Platform,
    pub settle: Duration,
}

pub async fn run<R>(config: &HoroConfig, theme: Arc<ThemeProvider>, options: Options, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let auth = Arc::new(MemoryAuth::new());
    let gate = Arc::new(SessionGate::new());
    let feed = MemoryFeed::new();
    let console = Arc::new(ConsoleFacility::new());
    let facility: Arc<dyn NotificationFacility> = console.clone();
    let sink = sink::select_sink(options.platform, Some(facility), config.relay.sound.clone());

    let relay = Relay::new(RelayDeps {
        session: Arc::clone(&gate),
        theme,
        feed: Arc::new(feed.clone()),
        sink,
        handler: Arc::new(LogHandler),
        prefs: config.notifications,
    });

    let mut bus_rx = relay.bus().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Could not encode relay event: {e}"),
            }
        }
    });

    let relay = relay.spawn();
    let auth_task = gate.spawn(auth.clone());
    info!(platform = %options.platform, "Simulation started");

    let mut lines = input.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read script")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: Step = serde_json::from_str(line)
            .with_context(|| format!("Invalid step on line {line_no}"))?;
        apply(step, &auth, &feed, &console).await?;
        tokio::task::yield_now().await;
    }

    tokio::time::sleep(options.settle).await;
    relay.shutdown().await;
    auth_task.abort();
    printer.abort();
    Ok(())
}

async fn apply(step: Step, auth: &MemoryAuth, feed: &MemoryFeed, console: &ConsoleFacility) -> Result<()> {
    match step {
        Step::SignIn { user } => auth.sign_in(user),
        Step::SignOut => auth.sign_out().await?,
        Step::Expire => auth.expire(),
        Step::Change {
            user,
            resource,
            operation,
            payload,
        } => {
            let owner = Identity::new(user);
            let delivered = feed.publish(resource, &owner, operation, payload);
            if delivered == 0 {
                info!(%resource, user = %owner, "No open subscription for this change");
            }
        }
        Step::Tap { resource, payload } => {
            let data = NotificationData {
                resource_class: resource,
                payload,
            };
            console.tap(serde_json::to_value(&data)?);
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
    }
    Ok(())
}
