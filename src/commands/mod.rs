use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::CommandError;
use crate::resp::*;
use crate::types::{Role, ServerState};

/// Outcome of running one command on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bytes to write back as a single buffer.
    Data(Bytes),
    /// The connection asked for PSYNC; the caller runs the full-resync sequence.
    FullResync,
    /// Nothing goes back on the wire.
    Silent,
}

/// Who sent the command.
///
/// Commands streamed by our own master are applied but never answered,
/// with the exception of `REPLCONF GETACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Master,
}

/// Runs a decoded command. The verb is matched case-insensitively; arguments are taken verbatim.
pub fn execute(args: &[String], state: &ServerState, origin: Origin) -> Reply {
    let Some(verb) = args.first() else {
        return Reply::Silent;
    };
    let verb = verb.to_ascii_lowercase();

    let result = match verb.as_str() {
        "ping" => handle_ping(args),
        "echo" => handle_echo(args),
        "set" => handle_set(args, state, origin),
        "get" => handle_get(args, state),
        "info" => handle_info(args, state),
        "replconf" => handle_replconf(args, state),
        "psync" => Ok(Reply::FullResync),
        _ => Err(CommandError::UnknownCommand(verb.clone())),
    };

    let reply = result.unwrap_or_else(|err| Reply::Data(encode_error(&err.to_string())));

    if origin == Origin::Master && !is_getack(args) {
        if let Reply::Data(data) = &reply {
            debug!(command = %verb, reply = ?data, "suppressing reply on master link");
        }
        return Reply::Silent;
    }
    reply
}

fn is_getack(args: &[String]) -> bool {
    args.len() >= 2
        && args[0].eq_ignore_ascii_case("replconf")
        && args[1].eq_ignore_ascii_case("getack")
}

pub fn handle_ping(_args: &[String]) -> Result<Reply, CommandError> {
    Ok(Reply::Data(encode_simple_string("PONG")))
}

pub fn handle_echo(args: &[String]) -> Result<Reply, CommandError> {
    match args {
        [_, message] => Ok(Reply::Data(encode_bulk_string(message))),
        _ => Err(CommandError::WrongArity("echo")),
    }
}

pub fn handle_set(args: &[String], state: &ServerState, origin: Origin) -> Result<Reply, CommandError> {
    let (key, value, ttl) = match args {
        [_, key, value] => (key, value, None),
        [_, key, value, option, ms] if option.eq_ignore_ascii_case("px") => {
            let ms = ms
                .parse::<i64>()
                .map_err(|_| CommandError::PxNotInteger(ms.clone()))?;
            let ms = u64::try_from(ms)
                .ok()
                .filter(|&ms| ms > 0)
                .ok_or(CommandError::InvalidExpireTime)?;
            (key, value, Some(Duration::from_millis(ms)))
        }
        [] | [_] | [_, _] => return Err(CommandError::WrongArity("set")),
        _ => return Err(CommandError::Syntax),
    };

    let propagate = state.role == Role::Master && origin == Origin::Client;
    state.apply_set(key.clone(), value.clone(), ttl, propagate);
    Ok(Reply::Data(encode_simple_string("OK")))
}

pub fn handle_get(args: &[String], state: &ServerState) -> Result<Reply, CommandError> {
    let [_, key] = args else {
        return Err(CommandError::WrongArity("get"));
    };
    let reply = match state.db().get(key) {
        Some(value) => encode_bulk_string(&value),
        None => encode_null_bulk_string(),
    };
    Ok(Reply::Data(reply))
}

/// Any section argument is accepted and ignored; only replication info exists.
pub fn handle_info(_args: &[String], state: &ServerState) -> Result<Reply, CommandError> {
    let reply = match state.role {
        Role::Replica => encode_simple_string("role:slave"),
        Role::Master => encode_bulk_string(&format!(
            "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:0",
            state.role, state.master_replid
        )),
    };
    Ok(Reply::Data(reply))
}

pub fn handle_replconf(args: &[String], state: &ServerState) -> Result<Reply, CommandError> {
    let Some(option) = args.get(1) else {
        return Err(CommandError::WrongArity("replconf"));
    };

    if option.eq_ignore_ascii_case("getack") {
        let offset = state.repl_offset().to_string();
        return Ok(Reply::Data(encode_array(&["REPLCONF", "ACK", offset.as_str()])));
    }
    if option.eq_ignore_ascii_case("ack") {
        return Ok(Reply::Silent);
    }
    if option.eq_ignore_ascii_case("listening-port") {
        debug!(port = ?args.get(2), "replica announced its listening port");
    }
    Ok(Reply::Data(encode_simple_string("OK")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{Config, MasterAddr};
    use crate::registry::ReplicaHandle;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn run(state: &ServerState, words: &[&str]) -> Reply {
        execute(&args(words), state, Origin::Client)
    }

    fn data(bytes: &'static [u8]) -> Reply {
        Reply::Data(Bytes::from_static(bytes))
    }

    fn master() -> Arc<ServerState> {
        ServerState::new(Config::default())
    }

    fn replica() -> Arc<ServerState> {
        ServerState::new(Config {
            replica_of: Some(MasterAddr {
                host: "127.0.0.1".into(),
                port: 6379,
            }),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn ping_echo_and_verb_case() {
        let state = master();
        assert_eq!(run(&state, &["PING"]), data(b"+PONG\r\n"));
        assert_eq!(run(&state, &["pInG"]), data(b"+PONG\r\n"));
        assert_eq!(run(&state, &["echo", "Hey"]), data(b"$3\r\nHey\r\n"));
        assert_eq!(
            run(&state, &["ECHO"]),
            data(b"-ERR wrong number of arguments for 'echo' command\r\n")
        );
    }

    #[tokio::test]
    async fn empty_command_is_ignored() {
        assert_eq!(execute(&[], &master(), Origin::Client), Reply::Silent);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let state = master();
        assert_eq!(run(&state, &["SET", "k", "v"]), data(b"+OK\r\n"));
        assert_eq!(run(&state, &["GET", "k"]), data(b"$1\r\nv\r\n"));
        assert_eq!(run(&state, &["GET", "k"]), data(b"$1\r\nv\r\n"));
        assert_eq!(run(&state, &["GET", "missing"]), data(b"$-1\r\n"));
    }

    #[tokio::test]
    async fn px_expires_the_key() {
        let state = master();
        assert_eq!(run(&state, &["SET", "k", "v", "px", "50"]), data(b"+OK\r\n"));
        assert_eq!(run(&state, &["GET", "k"]), data(b"$1\r\nv\r\n"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(run(&state, &["GET", "k"]), data(b"$-1\r\n"));
    }

    #[tokio::test]
    async fn set_argument_errors() {
        let state = master();
        assert_eq!(
            run(&state, &["SET", "k", "v", "px", "soon"]),
            data(b"-ERR PX value (soon) is not an integer\r\n")
        );
        assert_eq!(
            run(&state, &["SET", "k", "v", "PX", "-5"]),
            data(b"-ERR invalid expire time in 'set' command\r\n")
        );
        assert_eq!(run(&state, &["SET", "k", "v", "ex", "5"]), data(b"-ERR syntax error\r\n"));
        assert_eq!(
            run(&state, &["SET", "k"]),
            data(b"-ERR wrong number of arguments for 'set' command\r\n")
        );
        assert_eq!(run(&state, &["GET", "k"]), data(b"$-1\r\n"));
    }

    #[tokio::test]
    async fn unknown_command_names_the_lowercased_verb() {
        let state = master();
        assert_eq!(
            run(&state, &["FOO", "bar"]),
            data(b"-ERR unknown command 'foo'\r\n")
        );
        assert_eq!(run(&state, &["PING"]), data(b"+PONG\r\n"));
    }

    #[tokio::test]
    async fn info_reports_role() {
        let state = master();
        let expected = format!(
            "role:master\r\nmaster_replid:{}\r\nmaster_repl_offset:0",
            state.master_replid
        );
        assert_eq!(run(&state, &["INFO", "replication"]), Reply::Data(encode_bulk_string(&expected)));
        assert_eq!(run(&replica(), &["info"]), data(b"+role:slave\r\n"));
    }

    #[tokio::test]
    async fn replconf_and_psync() {
        let state = replica();
        assert_eq!(run(&state, &["REPLCONF", "listening-port", "6380"]), data(b"+OK\r\n"));
        assert_eq!(run(&state, &["REPLCONF", "capa", "psync2"]), data(b"+OK\r\n"));
        assert_eq!(run(&state, &["REPLCONF", "ACK", "10"]), Reply::Silent);
        state.advance_repl_offset(37);
        assert_eq!(
            run(&state, &["REPLCONF", "getack", "*"]),
            data(b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n37\r\n")
        );
        assert_eq!(run(&state, &["PSYNC", "?", "-1"]), Reply::FullResync);
    }

    #[tokio::test]
    async fn master_link_commands_apply_silently() {
        let state = replica();
        let from_master = |words: &[&str]| execute(&args(words), &state, Origin::Master);
        assert_eq!(from_master(&["SET", "a", "1"]), Reply::Silent);
        assert_eq!(from_master(&["PING"]), Reply::Silent);
        assert_eq!(
            from_master(&["REPLCONF", "GETACK", "*"]),
            data(b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$1\r\n0\r\n")
        );
        assert_eq!(run(&state, &["GET", "a"]), data(b"$1\r\n1\r\n"));
    }

    #[tokio::test]
    async fn master_propagates_plain_set_without_ttl() {
        let state = master();
        let (replica, mut rx) =
            ReplicaHandle::new(state.replicas.next_id(), "127.0.0.1:6380".parse().unwrap());
        state.replicas.add(replica);

        run(&state, &["SET", "a", "1", "px", "1000"]);
        run(&state, &["GET", "a"]);
        run(&state, &["SET", "b", "2"]);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(&first[..], b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n");
        assert_eq!(&second[..], b"*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n");
    }

    #[tokio::test]
    async fn replica_does_not_propagate_client_writes() {
        let state = replica();
        let (handle, mut rx) =
            ReplicaHandle::new(state.replicas.next_id(), "127.0.0.1:6381".parse().unwrap());
        state.replicas.add(handle);
        assert_eq!(run(&state, &["SET", "a", "1"]), data(b"+OK\r\n"));
        assert!(rx.try_recv().is_err());
    }
}
