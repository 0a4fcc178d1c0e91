//! Driver-side connection to a target.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axpilot_core::command::{BatchOutcome, CommandBatch};
use axpilot_core::geometry::Rectangle;
use axpilot_core::locator::ResolvedElement;
use axpilot_core::path::ElementPath;
use axpilot_core::protocol::{Command, Request, Response, ResponseData, MAX_FRAME_SIZE};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::daemon::framing::{read_frame, write_frame, Frame};

/// Client for one target.
///
/// The TCP connection is opened on first use. Any transport failure drops
/// it; the next call reconnects. Nothing is retried automatically.
pub struct TargetClient {
    addr: String,
    stream: Option<TcpStream>,
    timeout: Duration,
    /// Target's delay after each primitive; batch waits grow by this much
    /// per command.
    settle: Duration,
}

impl TargetClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            timeout,
            settle: Duration::ZERO,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
                .await
                .with_context(|| format!("Timed out connecting to {}", self.addr))?
                .with_context(|| format!("Failed to connect to target at {}", self.addr))?;
            info!(addr = %self.addr, "Connected to target");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow!("Connection to {} unavailable", self.addr))
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, command: Command) -> Result<Response> {
        let wait = self.response_wait(&command);
        let request = Request::new(command);
        debug!(kind = request.command.kind(), ?wait, "Sending request");
        let result = self.exchange(&request, wait).await;
        if result.is_err() {
            // The stream may hold a half-read frame; never reuse it.
            self.stream = None;
        }
        result
    }

    /// A batch keeps the target busy for at least one settle delay per
    /// primitive before it can answer.
    fn response_wait(&self, command: &Command) -> Duration {
        match command {
            Command::ExecuteBatch { commands } => {
                let count = u32::try_from(commands.len()).unwrap_or(u32::MAX);
                self.timeout.saturating_add(self.settle.saturating_mul(count))
            }
            _ => self.timeout,
        }
    }

    async fn exchange(&mut self, request: &Request, wait: Duration) -> Result<Response> {
        let stream = self.stream().await?;
        write_frame(stream, request).await?;

        let frame = timeout(wait, read_frame(stream, MAX_FRAME_SIZE))
            .await
            .context("Request timed out")??;
        match frame {
            Frame::Message(bytes) => {
                axpilot_core::protocol::decode(&bytes).context("Failed to parse response")
            }
            Frame::Oversized(size) => bail!("Response of {} bytes exceeds the frame limit", size),
            Frame::Eof => bail!("Target closed connection unexpectedly"),
        }
    }

    /// Send a request and turn a failed response into an error.
    async fn call(&mut self, command: Command) -> Result<ResponseData> {
        let response = self.request(command).await?;
        if let Some(err) = response.api_error() {
            return Err(err.into());
        }
        response
            .data
            .ok_or_else(|| anyhow!("Target sent a successful response without data"))
    }

    pub async fn resolve_element(&mut self, path: &ElementPath) -> Result<ResolvedElement> {
        let data = self
            .call(Command::ResolveElement {
                path: path.display_path(),
                role_constraints: path.roles(),
            })
            .await?;
        match data {
            ResponseData::Element {
                position,
                size,
                name,
                role,
            } => Ok(ResolvedElement {
                rect: Rectangle::from_parts(position, size),
                name,
                role,
            }),
            other => bail!("Unexpected response to resolve_element: {:?}", other),
        }
    }

    pub async fn app_region(&mut self) -> Result<Rectangle> {
        match self.call(Command::GetAppRegion {}).await? {
            ResponseData::Region { region } => Ok(Rectangle::from_array(region)),
            other => bail!("Unexpected response to get_app_region: {:?}", other),
        }
    }

    /// PNG bytes of `region`, or of the whole screen.
    pub async fn screenshot(&mut self, region: Option<Rectangle>) -> Result<Vec<u8>> {
        let data = self
            .call(Command::GetScreenshot {
                region: region.map(Rectangle::to_array),
            })
            .await?;
        let ResponseData::Screenshot {
            image_bytes_hex,
            size,
        } = data
        else {
            bail!("Unexpected response to get_screenshot");
        };
        if image_bytes_hex.len() != size.saturating_mul(2) {
            bail!(
                "Screenshot payload is {} hex chars but {} bytes were announced",
                image_bytes_hex.len(),
                size
            );
        }
        hex::decode(image_bytes_hex).context("Screenshot payload is not valid hex")
    }

    /// Dispatch a compiled batch.
    ///
    /// A batch whose primitives failed is still `Ok`; check
    /// [`BatchOutcome::success`].
    pub async fn execute_batch(&mut self, batch: &CommandBatch) -> Result<BatchOutcome> {
        let response = self
            .request(Command::ExecuteBatch {
                commands: batch.commands.clone(),
            })
            .await?;
        match response.data {
            Some(ResponseData::Batch { results }) => Ok(BatchOutcome { results }),
            _ => match response.api_error() {
                Some(err) => Err(err.into()),
                None => bail!("Target sent no batch results"),
            },
        }
    }

    /// Tell the target to clear its cache, then close the connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        let response = self.request(Command::Disconnect {}).await;
        self.stream = None;
        match response?.api_error() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
