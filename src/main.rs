use anyhow::{Context, anyhow, bail};
use chrono::Local;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tgcall::calls::media::LoggingMediaEngine;
use tgcall::calls::{CallEvent, CallManager, LoopbackRelay};
use tgcall::config::CallManagerConfig;
use tgcall::tgcore::types::CallId;
use tokio::sync::broadcast;

// Two clients calling each other through an in-process relay.
//
// Usage:
//   cargo run                       # call, talk for 2 seconds, hang up
//   cargo run -- --seconds 5        # talk longer
//   cargo run -- -s 0 --decline     # callee declines instead of answering

const CALLER: i64 = 1001;
const CALLEE: i64 = 1002;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let seconds = parse_arg(&args, "--seconds", "-s")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(2);
    let decline = args.iter().any(|a| a == "--decline");

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            return;
        }
    };

    if let Err(e) = rt.block_on(run(Duration::from_secs(seconds), decline)) {
        error!("Demo failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(talk_time: Duration, decline: bool) -> anyhow::Result<()> {
    let relay = Arc::new(LoopbackRelay::new().with_server_config(r#"{"bad_call_rating": true}"#));
    let caller_media = Arc::new(LoggingMediaEngine::new());
    let callee_media = Arc::new(LoggingMediaEngine::new());

    let caller = CallManager::new(
        CALLER,
        CallManagerConfig::default(),
        Arc::new(relay.connect(CALLER)),
        caller_media.clone(),
    );
    let callee = CallManager::new(
        CALLEE,
        CallManagerConfig::default(),
        Arc::new(relay.connect(CALLEE)),
        callee_media.clone(),
    );
    let _caller_task = caller.run();
    let _callee_task = callee.run();

    let mut caller_events = caller.subscribe();
    let mut callee_events = callee.subscribe();

    let call_id = caller.place_call(CALLEE).await?;
    info!("Calling {} (call {})", CALLEE, call_id);

    let incoming = wait_for(&mut callee_events, |event| match event {
        CallEvent::IncomingCall { call_id, caller } => Some((*call_id, *caller)),
        _ => None,
    })
    .await?;
    info!("User {} is ringing, call from {}", CALLEE, incoming.1);

    if decline {
        callee
            .decline(incoming.0, tgcall::tgcore::types::DiscardReason::Busy)
            .await?;
        let state = wait_for(&mut caller_events, |event| match event {
            CallEvent::Terminated { state, .. } => Some(state.clone()),
            _ => None,
        })
        .await?;
        info!("Caller sees the call end as {}", state.name());
        return Ok(());
    }

    callee.accept(incoming.0).await?;

    let caller_emojis = established(&mut caller_events, call_id).await?;
    let callee_emojis = established(&mut callee_events, incoming.0).await?;
    info!("Caller sees  {}", caller_emojis.join(" "));
    info!("Callee sees  {}", callee_emojis.join(" "));
    if caller_emojis != callee_emojis {
        bail!("visualizations differ, the key exchange was tampered with");
    }

    tokio::time::sleep(talk_time).await;

    let summary = caller
        .discard(call_id)
        .await?
        .context("call ended before hangup")?;
    info!(
        "Hung up after {}s (relay {:?})",
        summary.duration_secs, summary.preferred_relay_id
    );

    let summary = wait_for(&mut callee_events, |event| match event {
        CallEvent::Terminated { summary, .. } => Some(summary.clone()),
        _ => None,
    })
    .await?;
    if summary.need_rating {
        callee.rate_call(incoming.0, 5, "loud and clear").await?;
        info!("Callee left a rating");
    }

    info!(
        "Cleaned up {} caller and {} callee calls",
        caller.cleanup_ended_calls().await,
        callee.cleanup_ended_calls().await
    );
    info!(
        "Dropped {} media sessions and {} relay calls",
        caller_media.forget_stopped() + callee_media.forget_stopped(),
        relay.prune_discarded()
    );
    Ok(())
}

async fn established(
    events: &mut broadcast::Receiver<CallEvent>,
    id: CallId,
) -> anyhow::Result<[&'static str; 4]> {
    wait_for(events, |event| match event {
        CallEvent::Established { call_id, .. } if *call_id == id => event.emojis().map(Ok),
        CallEvent::Terminated { call_id, state, .. } if *call_id == id => Some(Err(anyhow!(
            "call {} ended as {} before connecting",
            call_id,
            state.name()
        ))),
        _ => None,
    })
    .await?
}

async fn wait_for<T>(
    events: &mut broadcast::Receiver<CallEvent>,
    mut pick: impl FnMut(&CallEvent) -> Option<T>,
) -> anyhow::Result<T> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(value) = pick(&event) {
                        return Ok(value);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(anyhow::Error::new(e)),
            }
        }
    })
    .await
    .context("timed out waiting for a call event")?
}

fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == long || arg == short {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix(&format!("{}=", long)) {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tgcall::calls::{CallState, DiscardSummary};

    /// Test that a call ending before it connects fails the wait at once
    #[tokio::test]
    async fn test_established_stops_at_termination() {
        let (tx, mut rx) = broadcast::channel(8);
        let id = CallId(7);
        tx.send(CallEvent::Terminated {
            call_id: id,
            state: CallState::Busy {
                ended_at: Utc::now(),
            },
            summary: DiscardSummary::default(),
        })
        .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), established(&mut rx, id))
            .await
            .expect("terminated call should not wait out the event timeout");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("before connecting"));
    }
}
