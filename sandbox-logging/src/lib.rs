//! Tracing setup for the sandbox control plane.
//!
//! The binary builds a [`LogConfig`] (usually from the environment) and hands
//! it to [`init_subscriber`]; the returned guard must outlive the process'
//! logging or buffered file output is lost.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::Directive, fmt::MakeWriter, prelude::*, registry, EnvFilter};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("invalid log filter '{0}': {1}")]
    Filter(String, String),

    #[error("unknown log {kind} '{value}'")]
    Unknown { kind: &'static str, value: String },

    #[error("tracing subscriber already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file_path: PathBuf::from("/tmp/sandboxd.log"),
        }
    }
}

impl LogConfig {
    /// Read `SANDBOX_LOG_LEVEL`, `SANDBOX_LOG_FORMAT`, `SANDBOX_LOG_OUTPUT`
    /// and `SANDBOX_LOG_FILE`.
    pub fn from_env() -> Result<Self, LogError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LogConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LogError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let format = match lookup("SANDBOX_LOG_FORMAT").as_deref() {
            None | Some("human") => LogFormat::Human,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(LogError::Unknown {
                    kind: "format",
                    value: other.to_string(),
                })
            }
        };

        let output = match lookup("SANDBOX_LOG_OUTPUT").as_deref() {
            None | Some("console") => LogOutput::Console,
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            Some(other) => {
                return Err(LogError::Unknown {
                    kind: "output",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            level: lookup("SANDBOX_LOG_LEVEL").unwrap_or(defaults.level),
            format,
            output,
            file_path: lookup("SANDBOX_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        })
    }

    fn filter(&self) -> Result<EnvFilter, LogError> {
        let filter = |directive: &str| -> Result<Directive, LogError> {
            directive
                .parse::<Directive>()
                .map_err(|e| LogError::Filter(directive.to_string(), e.to_string()))
        };

        Ok(EnvFilter::try_new(&self.level)
            .map_err(|e| LogError::Filter(self.level.clone(), e.to_string()))?
            .add_directive(filter("hyper=warn")?)
            .add_directive(filter("kube_client=warn")?)
            .add_directive(filter("tower=warn")?))
    }
}

// Duplicates every write to two sinks; console and file in `both` mode.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

fn install<W>(config: &LogConfig, writer: W) -> Result<(), LogError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = registry().with(config.filter()?);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => subscriber.with(layer.json()).try_init(),
        LogFormat::Human => subscriber.with(layer).try_init(),
    };
    result.map_err(|_| LogError::AlreadyInstalled)
}

/// Install the global subscriber described by `config`.
pub fn init_subscriber(config: &LogConfig) -> Result<Option<WorkerGuard>, LogError> {
    let log_dir = config
        .file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_name = config
        .file_path
        .file_name()
        .unwrap_or_else(|| "sandboxd.log".as_ref());

    match config.output {
        LogOutput::Console => {
            install(config, io::stdout)?;
            Ok(None)
        }
        LogOutput::File => {
            let appender = tracing_appender::rolling::daily(log_dir, log_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install(config, writer)?;
            Ok(Some(guard))
        }
        LogOutput::Both => {
            let appender = tracing_appender::rolling::daily(log_dir, log_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install(
                config,
                MakeTee {
                    make_a: io::stdout,
                    make_b: writer,
                },
            )?;
            Ok(Some(guard))
        }
    }
}
