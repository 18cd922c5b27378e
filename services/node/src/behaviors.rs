//! Demo behaviors hosted by the node
//!
//! - `pong.main`: answers every `ping` with a `pong` carrying the same `seq`
//! - `ping.main`: plays `rounds` exchanges with `peer`, pausing `interval_ms`
//!   between them on a timer, then stops the peer
//! - `echo.listener`: listens on `port` and spawns a fresh `echo.connection`
//!   actor for each connection
//! - `echo.connection`: claims the connection named in `conn` and echoes its
//!   bytes

use messaging_actors::{
    ActorContext, ActorId, BehaviorRegistry, BehaviorResult, DescriptorId, Dict, RuntimeError,
    Value,
};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

pub fn registry() -> BehaviorRegistry {
    let mut behaviors = BehaviorRegistry::new();
    behaviors
        .register_fn("pong", "main", pong)
        .register_fn("ping", "main", ping)
        .register_fn("echo", "listener", echo_listener)
        .register_fn("echo", "connection", echo_connection);
    behaviors
}

fn actor_arg(args: &Dict, key: &str) -> Result<ActorId, RuntimeError> {
    args.get_opaque(key)
        .map(ActorId::from_opaque)
        .ok_or_else(|| RuntimeError::behavior(format!("missing actor argument '{}'", key)))
}

fn descriptor_arg(args: &Dict, key: &str) -> Result<DescriptorId, RuntimeError> {
    args.get_opaque(key)
        .map(DescriptorId::from_opaque)
        .ok_or_else(|| RuntimeError::behavior(format!("missing descriptor argument '{}'", key)))
}

async fn pong(ctx: ActorContext, _args: Dict) -> BehaviorResult {
    let mut answered = 0u32;
    loop {
        let message = ctx.recv_message().await?;
        let payload = message.payload();
        match payload.get_str("op") {
            Some("stop") => break,
            Some("ping") => {
                let Some(source) = message.source() else {
                    continue;
                };
                let mut reply = ctx.payload();
                reply.set("op", "pong")?;
                reply.set_number("seq", payload.get_number("seq").unwrap_or(0.0))?;
                ctx.send(source, reply)?;
                answered += 1;
            }
            other => debug!(actor_id = %ctx.id(), op = ?other, "Ignoring message"),
        }
    }
    info!(actor_id = %ctx.id(), answered, "Pong finished");
    Ok(vec![Value::number(answered)])
}

async fn ping(ctx: ActorContext, args: Dict) -> BehaviorResult {
    let peer = actor_arg(&args, "peer")?;
    let rounds = args.require_number("rounds")?.unwrap_or(1.0) as u32;
    let interval = Duration::from_millis(args.require_number("interval_ms")?.unwrap_or(100.0) as u64);

    let mut total = Duration::ZERO;
    for seq in 0..rounds {
        let started = Instant::now();
        let mut request = ctx.payload();
        request.set("op", "ping")?;
        request.set_number("seq", seq as f64)?;
        ctx.send(peer, request)?;

        let reply = ctx.recv().await?;
        let rtt = started.elapsed();
        total += rtt;
        debug!(actor_id = %ctx.id(), seq, rtt_us = rtt.as_micros() as u64, op = ?reply.get_str("op"), "Round trip");

        if seq + 1 < rounds {
            let mut next = ctx.payload();
            next.set("op", "next")?;
            ctx.send_after(interval, ctx.id(), next)?;
            ctx.recv().await?;
        }
    }

    let mut stop = ctx.payload();
    stop.set("op", "stop")?;
    ctx.send(peer, stop)?;

    let average_us = total.as_micros() as u64 / u64::from(rounds.max(1));
    info!(actor_id = %ctx.id(), rounds, average_us, "Ping finished");
    Ok(vec![Value::number(rounds)])
}

async fn echo_listener(ctx: ActorContext, args: Dict) -> BehaviorResult {
    let port = args.require_number("port")?.unwrap_or(0.0) as u16;
    let listener = ctx.listen(port, None, |ctx, accepted| {
        let mut conn_args = ctx.payload();
        if let Err(e) = conn_args.set("conn", accepted.handle()) {
            warn!(error = %e, "Dropping connection");
            return;
        }
        if let Err(e) = ctx.spawn("echo", "connection", conn_args) {
            warn!(peer = %accepted.peer, error = %e, "Failed to hand off connection");
            let _ = ctx.close_descriptor(accepted.descriptor);
        }
    })?;
    info!(actor_id = %ctx.id(), address = %listener.local_addr, "Echo listener ready");

    loop {
        let payload = ctx.recv().await?;
        if payload.get_str("op") == Some("stop") {
            ctx.stop_listening()?;
            return Ok(vec![]);
        }
    }
}

async fn echo_connection(ctx: ActorContext, args: Dict) -> BehaviorResult {
    let conn = descriptor_arg(&args, "conn")?;
    ctx.claim(conn)?;
    let stream = ctx.take_stream(conn)?;
    stream.set_nonblocking(true)?;
    let mut stream = tokio::net::TcpStream::from_std(stream)?;
    let peer = stream.peer_addr().ok();

    let mut buffer = vec![0u8; 4096];
    let mut echoed = 0usize;
    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        stream.write_all(&buffer[..read]).await?;
        echoed += read;
    }
    debug!(actor_id = %ctx.id(), peer = ?peer, echoed, "Connection closed");
    Ok(vec![Value::number(echoed as f64)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging_actors::{ActorSystem, RuntimeConfig};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            workers: 2,
            bind_address: "127.0.0.1".to_string(),
            ..RuntimeConfig::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_ping_pong_completes() {
        let system = ActorSystem::new(config(), registry()).unwrap();
        let pong = system.spawn("pong", "main", system.new_payload()).unwrap();

        let mut args = system.new_payload();
        args.set_opaque("peer", pong).unwrap();
        args.set_number("rounds", 3.0).unwrap();
        args.set_number("interval_ms", 1.0).unwrap();
        system.spawn("ping", "main", args).unwrap();

        wait_for(|| system.actor_count() == 0);
        let stats = system.stats();
        assert_eq!(stats.actors_stopped, 2);
        assert_eq!(stats.behavior_failures, 0);
        // 3 pings, 3 pongs, 2 timer wakeups, 1 stop
        assert_eq!(stats.messages_sent, 9);
    }

    #[test]
    fn test_ping_without_peer_fails() {
        let system = ActorSystem::new(config(), registry()).unwrap();
        system.spawn("ping", "main", system.new_payload()).unwrap();
        wait_for(|| system.stats().behavior_failures == 1);
    }

    #[test]
    fn test_echo_connection_hand_off() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        let system = ActorSystem::new(config(), registry()).unwrap();
        let mut args = system.new_payload();
        args.set("port", port).unwrap();
        system.spawn("echo", "listener", args).unwrap();

        let mut client = None;
        wait_for(|| {
            client = TcpStream::connect(("127.0.0.1", port)).ok();
            client.is_some()
        });
        let mut client = client.unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"spindle").unwrap();
        let mut reply = [0u8; 7];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"spindle");

        drop(client);
        wait_for(|| system.stats().actors_stopped == 1);
        let stats = system.stats();
        assert_eq!(stats.connections_accepted, 1);
        assert_eq!(stats.descriptors_transferred, 1);
    }
}
