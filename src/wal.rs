use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::ChangeEvent;

/// One durable unit of work. A booking insert and its event-counter update
/// travel in the same commit so crash replay can never observe one without
/// the other.
pub type Commit = Vec<ChangeEvent>;

/// Encode a commit to `[u32 len][bincode payload][u32 crc32]`.
fn encode_commit(writer: &mut impl Write, commit: &Commit) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only journal of commits.
///
/// Frame format: `[u32: len][bincode: Vec<ChangeEvent>][u32: crc32]`.
/// A truncated or corrupt trailing frame (crash mid-write) is discarded on
/// replay via the length prefix + CRC check — whole commits survive or
/// whole commits vanish, never halves.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    commits_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            commits_since_compact: 0,
        })
    }

    /// Buffer a commit without flushing. Call `flush_sync` afterwards to make
    /// the whole batch durable with a single fsync (group commit).
    pub fn append_buffered(&mut self, commit: &Commit) -> io::Result<()> {
        encode_commit(&mut self.writer, commit)?;
        self.commits_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append a single commit and fsync. Test convenience; production goes
    /// through the group-commit writer task.
    #[cfg(test)]
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commits_since_compact(&self) -> u64 {
        self.commits_since_compact
    }

    /// Write a compacted journal to a temp file and fsync it. Slow I/O phase;
    /// runs before the atomic swap.
    pub fn write_compact_file(path: &Path, commits: &[Commit]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for commit in commits {
            encode_commit(&mut writer, commit)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the live journal and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.commits_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, commits: &[Commit]) -> io::Result<()> {
        Self::write_compact_file(&self.path, commits)?;
        self.swap_compact_file()
    }

    /// Replay the journal, returning every intact commit in append order.
    /// Stops silently at the first truncated or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut commits = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Commit>(&payload) {
                Ok(commit) => commits.push(commit),
                Err(_) => break,
            }
        }

        Ok(commits)
    }
}

// ── Group-commit writer task ─────────────────────────────────────

pub(crate) enum WalCommand {
    Commit {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        commits: Vec<Commit>,
        response: oneshot::Sender<io::Result<()>>,
    },
    CommitsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the journal. Batches whatever commits are
/// immediately available into one buffered write + one fsync, then answers
/// every waiting committer.
pub(crate) async fn run_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Commit { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Commit { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, batch);
                if let Some(cmd) = deferred {
                    handle_maintenance(&mut wal, cmd);
                }
            }
            other => handle_maintenance(&mut wal, other),
        }
    }
}

/// Append and flush one batch, answering each committer individually. When
/// a commit fails to append, appending stops there: commits before it are
/// still flushed and answered `Ok`; the failing commit and everything queued
/// behind it get `Err`. A flush failure fails the whole batch — bytes the OS
/// already accepted may still survive a crash, which replay tolerates since
/// a replayed commit applies as an upsert and a torn trailing frame is
/// dropped by the CRC check.
fn flush_and_respond(wal: &mut Wal, batch: Vec<(Commit, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<(usize, io::Error)> = None;
    for (index, (commit, _)) in batch.iter().enumerate() {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some((index, e));
            break;
        }
    }
    // Flush even on append error so the commits appended before it become
    // durable and buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    let failed_at = append_err.as_ref().map(|(index, _)| *index);
    let flush_failed = flush_err.is_some();
    for (index, (_, tx)) in batch.into_iter().enumerate() {
        let result = match (&flush_err, &append_err) {
            _ if commit_durable(index, failed_at, flush_failed) => Ok(()),
            (Some(e), _) | (None, Some((_, e))) => Err(io::Error::new(e.kind(), e.to_string())),
            (None, None) => Ok(()),
        };
        let _ = tx.send(result);
    }
}

/// Whether the commit at `index` in a batch reached the journal durably.
fn commit_durable(index: usize, failed_at: Option<usize>, flush_failed: bool) -> bool {
    !flush_failed && failed_at.is_none_or(|f| index < f)
}

fn handle_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { commits, response } => {
            let result = Wal::write_compact_file(wal.path(), &commits)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::CommitsSinceCompact { response } => {
            let _ = response.send(wal.commits_since_compact());
        }
        WalCommand::Commit { .. } => unreachable!(),
    }
}
