//! FTP store over `suppaftp`.

use super::{RemoteError, RemoteSession, RemoteStore};
use crate::config::RemoteConfig;
use std::io::Read;
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::FtpStream;
use suppaftp::types::FileType;

/// Connects to one FTP server with fixed credentials.
#[derive(Debug, Clone)]
pub struct FtpStore {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl FtpStore {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    fn connect_error(&self, message: impl ToString) -> RemoteError {
        RemoteError::Connect {
            host: format!("{}:{}", self.host, self.port),
            message: message.to_string(),
        }
    }
}

impl RemoteStore for FtpStore {
    fn open(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(e))?
            .next()
            .ok_or_else(|| self.connect_error("host did not resolve"))?;

        let mut stream =
            FtpStream::connect_timeout(addr, self.timeout).map_err(|e| self.connect_error(e))?;
        stream
            .login(&self.username, &self.password)
            .map_err(|e| self.connect_error(e))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| self.connect_error(e))?;
        tracing::debug!(host = %self.host, port = self.port, "ftp session opened");
        Ok(Box::new(FtpSession { stream }))
    }

    fn describe(&self) -> String {
        format!("ftp://{}@{}:{}", self.username, self.host, self.port)
    }
}

struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
        self.stream
            .cwd(dir)
            .map_err(|e| RemoteError::Navigation {
                path: dir.to_string(),
                message: e.to_string(),
            })
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
        self.stream
            .mkdir(dir)
            .map_err(|e| RemoteError::Navigation {
                path: dir.to_string(),
                message: e.to_string(),
            })
    }

    fn store(&mut self, filename: &str, mut reader: &mut dyn Read) -> Result<u64, RemoteError> {
        self.stream
            .put_file(filename, &mut reader)
            .map_err(|e| RemoteError::Transfer {
                path: filename.to_string(),
                message: e.to_string(),
            })
    }

    fn close(mut self: Box<Self>) -> Result<(), RemoteError> {
        self.stream.quit().map_err(|e| RemoteError::Connect {
            host: "ftp".to_string(),
            message: format!("QUIT failed: {e}"),
        })
    }
}
