//! The request/reply messages exchanged between the engine and a
//! container's init process over a `UnixStream` created before the
//! namespacing fork. Newline-delimited JSON: simple, and easy to reason
//! about compared to passing file descriptors across the namespace
//! boundary, which this protocol was deliberately designed to avoid (see
//! `container.rs`).

use crate::rlimit::RLimits;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

#[derive(Serialize, Deserialize, Debug)]
pub enum EngineMessage {
    /// Sent once the parent has written this container's uid_map/gid_map.
    Go,
    Exec {
        argv: Vec<String>,
        env: Vec<(String, String)>,
        uid: u32,
        gid: u32,
        rlimits: RLimits,
        stdin_path: String,
        stdout_path: String,
        stderr_path: String,
    },
    /// Sent once the engine has attached the reported pid to its cgroup.
    JoinedCgroup,
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum InitMessage {
    /// The init process has unshared its namespaces and is waiting for the
    /// uid/gid mapping to be written by the engine.
    Ready,
    MountsReady,
    Started { pid: i32 },
    Exited { code: Option<i32>, signal: Option<i32> },
    Error(String),
}

pub fn send(stream: &mut UnixStream, msg: &impl Serialize) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    stream.write_all(&line)
}

pub fn recv<T: for<'de> Deserialize<'de>>(reader: &mut BufReader<UnixStream>) -> std::io::Result<T> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "container protocol stream closed",
        ));
    }
    serde_json::from_str(&line)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
