use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Debug wire protocol between a running game process and an external
/// debugger/CLI: newline-delimited JSON messages over TCP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugMessage {
    /// A watched resource changed; the engine re-runs it through the load
    /// pipeline.
    Reload { script: String },
    /// Generic debugger command.
    Debug {
        command: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Generic engine command.
    Engine {
        command: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Listens for debugger connections and funnels parsed messages into a
/// channel the engine drains once per tick.
pub struct DebugServer {
    receiver: Receiver<DebugMessage>,
    local_addr: SocketAddr,
}

impl DebugServer {
    /// Bind and start accepting; pass port 0 for an ephemeral port.
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (sender, receiver) = unbounded::<DebugMessage>();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let sender = sender.clone();
                std::thread::spawn(move || {
                    let reader = BufReader::new(stream);
                    for line in reader.lines() {
                        let Ok(line) = line else { break };
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<DebugMessage>(&line) {
                            Ok(message) => {
                                if sender.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!("bad debug message: {e}"),
                        }
                    }
                });
            }
        });
        tracing::info!("debug server listening on {local_addr}");
        Ok(Self {
            receiver,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drain pending messages without blocking.
    pub fn poll(&self) -> Vec<DebugMessage> {
        self.receiver.try_iter().collect()
    }
}

/// Client side: send one message to a running game process.
pub fn send_message(addr: SocketAddr, message: &DebugMessage) -> Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stream.write_all(line.as_bytes())?;
    Ok(())
}
