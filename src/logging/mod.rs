use std::io::{self, Write};

use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{
    config,
    core::error::{ErrorContext, FrameResult},
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.config.level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Installs the global logger. Lines go to the configured file, or to
    /// stderr when no path is set. `RUST_LOG` still refines the filter.
    pub fn init_env_logger(&self) -> FrameResult<()> {
        let mut builder = Builder::from_env(env_logger::Env::default());
        builder.filter(None, self.level());
        if self.config.path.is_some() {
            builder.target(env_logger::Target::Pipe(Box::new(self.create_async_writer())));
        }
        builder.try_init().with_context("installing logger")
    }

    /// Drains buffered log lines into the log file until `shutdown` turns true
    /// or every writer is gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> FrameResult<()> {
        let Some(log_file_path) = self.config.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = std::path::Path::new(&log_file_path).parent() {
            if metadata(parent).await.is_err() {
                create_dir_all(parent).await.with_context("creating log path")?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&log_file_path)
                .await
                .with_context("opening log file")?,
        );

        // the logger itself holds a sender, drop it so the channel can close
        drop(self.sender);

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                log::error!("Failed to write to log file: {}", e);
                            }
                        }
                        None => {
                            log::info!("Log channel closed, stopping write log");
                            break;
                        }
                    }
                }
            }
        }

        // keep what is already buffered
        while let Ok(data) = self.receiver.try_recv() {
            if let Err(e) = file.write_all(&data).await {
                log::error!("Failed to write to log file: {}", e);
            }
        }
        file.flush().await.with_context("flushing log file")
    }
}
