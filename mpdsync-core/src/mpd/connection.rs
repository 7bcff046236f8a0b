//! One stateful TCP session to one player daemon (§4.1).

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::protocol::{self, Field};
use super::status::StatusSnapshot;
use super::{MpdError, MpdResult};
use crate::queue::{QueueChange, QueueEntry, TagOverrides};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Io {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// A queued write operation inside an open batch, along with a tag
/// describing what its result should be parsed as.
enum Queued {
    Plain,
    /// Expect an `Id: N` field and return it.
    Id,
}

pub struct Connection {
    host: String,
    port: u16,
    password: Option<String>,
    io: Option<Io>,
    batch: Option<Vec<(String, Vec<String>, Queued)>>,
}

/// Result of one operation inside a flushed batch.
pub enum BatchResult {
    Unit,
    Id(u32),
}

impl Connection {
    pub fn new(host: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password,
            io: None,
            batch: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    pub async fn connect(&mut self) -> MpdResult<()> {
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| MpdError::Timeout)??;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let writer = BufWriter::new(write_half);

        let mut greeting = String::new();
        let n = reader.read_line(&mut greeting).await?;
        if n == 0 {
            return Err(MpdError::UnexpectedEof);
        }
        if !greeting.starts_with("OK MPD") {
            return Err(MpdError::Protocol {
                line: greeting.trim_end().to_owned(),
            });
        }

        self.io = Some(Io { reader, writer });
        self.batch = None;

        if let Some(password) = self.password.clone() {
            self.raw_command_unit("password", &[&password]).await?;
        }

        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.io = None;
        self.batch = None;
    }

    async fn reconnect_once(&mut self) -> MpdResult<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Ping, and on failure attempt one reconnect. Returns whether the
    /// connection is alive afterwards.
    pub async fn check_alive(&mut self) -> bool {
        if self.raw_command_unit("ping", &[]).await.is_ok() {
            return true;
        }
        tracing::debug!(host = %self.host, "connection seems down, reconnecting");
        match self.reconnect_once().await {
            Ok(()) => {
                tracing::debug!(host = %self.host, "reconnected");
                true
            }
            Err(error) => {
                tracing::error!(host = %self.host, ?error, "unable to reconnect");
                false
            }
        }
    }

    /// Ping, pushing the measured round-trip duration into `pings`.
    pub async fn timed_ping(&mut self, pings: &mut crate::stats::WindowedStat) -> MpdResult<()> {
        let start = std::time::Instant::now();
        let result = self.raw_command_unit("ping", &[]).await;
        if result.is_ok() {
            pings.push(start.elapsed().as_secs_f64());
        }
        result
    }

    fn io_mut(&mut self) -> MpdResult<&mut Io> {
        self.io.as_mut().ok_or(MpdError::NotConnected)
    }

    async fn raw_command(&mut self, name: &str, args: &[&str]) -> MpdResult<Vec<Field>> {
        let io = self.io_mut()?;
        protocol::write_command(&mut io.writer, name, args).await?;
        protocol::read_block(&mut io.reader).await
    }

    async fn raw_command_unit(&mut self, name: &str, args: &[&str]) -> MpdResult<()> {
        self.raw_command(name, args).await.map(|_| ())
    }

    /// Read the current status. A failed read produces a null snapshot;
    /// callers are never handed an `Err` here (§3).
    pub async fn status(&mut self) -> StatusSnapshot {
        match self.try_status().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::debug!(host = %self.host, ?error, "status read failed");
                StatusSnapshot::null()
            }
        }
    }

    async fn try_status(&mut self) -> MpdResult<StatusSnapshot> {
        match self.raw_command("status", &[]).await {
            Ok(fields) => Ok(StatusSnapshot::parse(&fields)),
            Err(_) => {
                self.reconnect_once().await?;
                let fields = self.raw_command("status", &[]).await?;
                Ok(StatusSnapshot::parse(&fields))
            }
        }
    }

    pub async fn read_queue(&mut self) -> MpdResult<Vec<QueueEntry>> {
        let fields = match self.raw_command("playlistinfo", &[]).await {
            Ok(fields) => fields,
            Err(_) => {
                self.reconnect_once().await?;
                self.raw_command("playlistinfo", &[]).await?
            }
        };
        Ok(protocol::split_entries(fields, "file")
            .into_iter()
            .map(parse_queue_entry)
            .collect())
    }

    pub async fn queue_diff(&mut self, since_version: Option<&str>) -> MpdResult<Vec<QueueChange>> {
        let version = since_version.unwrap_or("0");
        let fields = match self.raw_command("plchanges", &[version]).await {
            Ok(fields) => fields,
            Err(_) => {
                self.reconnect_once().await?;
                self.raw_command("plchanges", &[version]).await?
            }
        };
        Ok(protocol::split_entries(fields, "file")
            .into_iter()
            .map(parse_queue_change)
            .collect())
    }

    pub async fn clear(&mut self) -> MpdResult<()> {
        self.raw_command_unit("clear", &[]).await
    }

    pub async fn add(&mut self, file: &str) -> MpdResult<()> {
        self.raw_command_unit("add", &[file]).await
    }

    pub async fn add_at(&mut self, file: &str, pos: u32) -> MpdResult<u32> {
        let pos = pos.to_string();
        let fields = self.raw_command("addid", &[file, &pos]).await?;
        parse_id(&fields)
    }

    pub async fn truncate_to(&mut self, n: u32) -> MpdResult<()> {
        if n == 0 {
            return self.clear().await;
        }
        let length = self.try_status().await?.queue_length;
        if length == 0 {
            return Ok(());
        }
        let from = n.to_string();
        let to = length.to_string();
        self.raw_command_unit("delete", &[&format!("{from}:{to}")])
            .await
    }

    pub async fn set_tag(&mut self, id: u32, tag: &str, value: &str) -> MpdResult<()> {
        let id = id.to_string();
        self.raw_command_unit("addtagid", &[&id, tag, value]).await
    }

    pub async fn play(&mut self) -> MpdResult<()> {
        self.raw_command_unit("play", &[]).await
    }

    pub async fn pause(&mut self) -> MpdResult<()> {
        self.raw_command_unit("pause", &["1"]).await
    }

    pub async fn stop(&mut self) -> MpdResult<()> {
        self.raw_command_unit("stop", &[]).await
    }

    pub async fn seek(&mut self, track: u32, seconds: f64) -> MpdResult<()> {
        let track = track.to_string();
        let seconds = format!("{seconds:.3}");
        self.raw_command_unit("seek", &[&track, &seconds]).await
    }

    /// Block until the daemon reports a change, returning the set of
    /// subsystem names that changed. Never times out — see §5.
    pub async fn await_change(&mut self) -> MpdResult<HashSet<String>> {
        let fields = self.raw_command("idle", &[]).await?;
        Ok(fields
            .into_iter()
            .filter(|(k, _)| k == "changed")
            .map(|(_, v)| v)
            .collect())
    }

    // -- batched writes (§4.1) -------------------------------------------

    pub fn batch_begin(&mut self) -> MpdResult<()> {
        if self.batch.is_some() {
            return Err(MpdError::CommandListAlreadyOpen);
        }
        self.batch = Some(Vec::new());
        Ok(())
    }

    /// Recover from an already-open batch by closing it and reopening,
    /// per §4.1: this is a lost-synchronization event, not fatal.
    pub fn batch_reopen(&mut self) {
        self.batch = Some(Vec::new());
    }

    pub fn queue_clear(&mut self) -> MpdResult<()> {
        self.enqueue("clear", vec![], Queued::Plain)
    }

    pub fn queue_add(&mut self, file: &str) -> MpdResult<()> {
        self.enqueue("add", vec![file.to_owned()], Queued::Plain)
    }

    pub fn queue_add_at(&mut self, file: &str, pos: u32) -> MpdResult<()> {
        self.enqueue(
            "addid",
            vec![file.to_owned(), pos.to_string()],
            Queued::Id,
        )
    }

    pub fn queue_set_tag(&mut self, id: u32, tag: &str, value: &str) -> MpdResult<()> {
        self.enqueue(
            "addtagid",
            vec![id.to_string(), tag.to_owned(), value.to_owned()],
            Queued::Plain,
        )
    }

    fn enqueue(&mut self, name: &str, args: Vec<String>, kind: Queued) -> MpdResult<()> {
        self.batch
            .as_mut()
            .ok_or(MpdError::NotConnected)?
            .push((name.to_owned(), args, kind));
        Ok(())
    }

    pub async fn batch_end(&mut self) -> MpdResult<Vec<BatchResult>> {
        let queued = self.batch.take().ok_or(MpdError::NotConnected)?;
        let io = self.io_mut()?;

        protocol::write_command(&mut io.writer, "command_list_ok_begin", &[]).await?;
        for (name, args, _) in &queued {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let line = protocol::render_command(name, &arg_refs);
            io.writer.write_all(line.as_bytes()).await?;
        }
        io.writer.flush().await?;
        protocol::write_command(&mut io.writer, "command_list_end", &[]).await?;

        let blocks = protocol::read_command_list_response(&mut io.reader).await?;
        queued
            .iter()
            .zip(blocks)
            .map(|((_, _, kind), fields)| match kind {
                Queued::Plain => Ok(BatchResult::Unit),
                Queued::Id => parse_id(&fields).map(BatchResult::Id),
            })
            .collect()
    }
}

fn parse_id(fields: &[Field]) -> MpdResult<u32> {
    fields
        .iter()
        .find(|(k, _)| k == "Id")
        .and_then(|(_, v)| v.parse().ok())
        .ok_or_else(|| MpdError::Protocol {
            line: "missing Id field in response".into(),
        })
}

fn parse_queue_entry(fields: Vec<Field>) -> QueueEntry {
    let file = field_value(&fields, "file").unwrap_or_default();
    let tags = parse_tags(&fields);
    QueueEntry { file, tags }
}

fn parse_queue_change(fields: Vec<Field>) -> QueueChange {
    let pos = field_value(&fields, "Pos")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let file = field_value(&fields, "file").unwrap_or_default();
    let tags = parse_tags(&fields);
    QueueChange { pos, file, tags }
}

fn parse_tags(fields: &[Field]) -> TagOverrides {
    TagOverrides {
        artist: field_value(fields, "Artist"),
        album: field_value(fields, "Album"),
        title: field_value(fields, "Title"),
        genre: field_value(fields, "Genre"),
    }
}

fn field_value(fields: &[Field], key: &str) -> Option<String> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}
