//! SUMO backend speaking TraCI over a local TCP socket

use std::{
    io::{Read, Write},
    net::{Ipv4Addr, TcpListener, TcpStream},
    path::Path,
    process::{Child, Command as Process, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::error::SimError;

use self::protocol::*;
use super::Simulator;

pub mod protocol;

/// How to launch and talk to SUMO
#[derive(Debug, Clone, PartialEq)]
pub struct TraciConfig {
    /// `sumo` or `sumo-gui`, or a full path
    pub binary: String,
    /// TraCI port; 0 picks a free one for every session
    pub port: u16,
    pub extra_args: Vec<String>,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Upper bound on every request/response exchange
    pub step_timeout: Duration,
}

impl Default for TraciConfig {
    fn default() -> Self {
        Self {
            binary: "sumo".into(),
            port: 0,
            extra_args: Vec::new(),
            connect_attempts: 60,
            connect_backoff: Duration::from_millis(100),
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// A connected TraCI client
pub struct TraciConnection {
    stream: TcpStream,
}

impl TraciConnection {
    /// Wrap an established stream, bounding every read and write by `timeout`
    pub fn new(stream: TcpStream, timeout: Duration) -> Result<Self, SimError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send one command and return the full response body
    fn request(&mut self, command: Command) -> Result<Vec<u8>, SimError> {
        self.stream.write_all(&encode_message(&[command]))?;

        let mut len = [0; 4];
        self.stream.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len < 4 {
            return Err(SimError::Protocol(format!("message length {len}")));
        }
        let mut body = vec![0; len - 4];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Send a command whose response carries nothing beyond the status
    fn exchange(&mut self, command: Command) -> Result<Vec<u8>, SimError> {
        let id = command.id();
        let body = self.request(command)?;
        Reader::new(&body).status(id)?;
        Ok(body)
    }

    /// API version and server identifier
    pub fn version(&mut self) -> Result<(i32, String), SimError> {
        let body = self.request(Command::new(CMD_GETVERSION))?;
        let mut reader = Reader::new(&body);
        reader.status(CMD_GETVERSION)?;
        let (id, mut version) = reader.command()?;
        if id != CMD_GETVERSION {
            return Err(SimError::Protocol(format!("version reply has id 0x{id:02x}")));
        }
        Ok((version.i32()?, version.string()?))
    }

    /// Advance the simulation by exactly one step
    pub fn simulation_step(&mut self) -> Result<(), SimError> {
        // target time 0 means "one step"; no subscriptions are registered
        self.exchange(Command::new(CMD_SIMSTEP).f64(0.0))?;
        Ok(())
    }

    fn edge_value<T>(
        &mut self,
        edge: &str,
        variable: u8,
        read: impl FnOnce(&mut Reader<'_>) -> Result<T, SimError>,
    ) -> Result<T, SimError> {
        let body = self.request(
            Command::new(CMD_GET_EDGE_VARIABLE)
                .u8(variable)
                .string(edge),
        )?;
        let mut reader = Reader::new(&body);
        reader.status(CMD_GET_EDGE_VARIABLE)?;

        let (id, mut value) = reader.command()?;
        if id != RESPONSE_GET_EDGE_VARIABLE {
            return Err(SimError::Protocol(format!("edge reply has id 0x{id:02x}")));
        }
        let var = value.u8()?;
        let object = value.string()?;
        if var != variable || object != edge {
            return Err(SimError::Protocol(format!(
                "asked for 0x{variable:02x} of `{edge}`, got 0x{var:02x} of `{object}`"
            )));
        }
        read(&mut value)
    }

    pub fn edge_vehicle_number(&mut self, edge: &str) -> Result<u32, SimError> {
        let count = self.edge_value(edge, LAST_STEP_VEHICLE_NUMBER, |r| r.typed_i32())?;
        u32::try_from(count)
            .map_err(|_| SimError::Protocol(format!("negative vehicle count {count} on `{edge}`")))
    }

    pub fn edge_mean_speed(&mut self, edge: &str) -> Result<f64, SimError> {
        self.edge_value(edge, LAST_STEP_MEAN_SPEED, |r| r.typed_f64())
    }

    pub fn set_traffic_light_program(&mut self, tls: &str, program: &str) -> Result<(), SimError> {
        self.exchange(
            Command::new(CMD_SET_TL_VARIABLE)
                .u8(TL_PROGRAM)
                .string(tls)
                .u8(TYPE_STRING)
                .string(program),
        )?;
        Ok(())
    }

    /// Ask the server to shut down
    pub fn close(mut self) -> Result<(), SimError> {
        self.exchange(Command::new(CMD_CLOSE))?;
        Ok(())
    }
}

/// Launches one SUMO process per session and drives it over TraCI
pub struct TraciSimulator {
    config: TraciConfig,
    child: Option<Child>,
    conn: Option<TraciConnection>,
}

impl TraciSimulator {
    pub fn new(config: TraciConfig) -> Self {
        Self {
            config,
            child: None,
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut TraciConnection, SimError> {
        self.conn.as_mut().ok_or(SimError::NotStarted)
    }

    fn free_port() -> Result<u16, SimError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        Ok(listener.local_addr()?.port())
    }

    fn connect(&mut self, port: u16) -> Result<TraciConnection, SimError> {
        let addr = (Ipv4Addr::LOCALHOST, port);
        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    debug!("connected to simulator on port {port} (attempt {attempt})");
                    return TraciConnection::new(stream, self.config.step_timeout);
                }
                Err(err) => last_err = Some(err),
            }

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(SimError::Protocol(format!(
                        "simulator exited before accepting connections ({status})"
                    )));
                }
            }
            thread::sleep(self.config.connect_backoff);
        }

        Err(SimError::Connect {
            addr: format!("{}:{}", addr.0, addr.1),
            attempts,
            source: last_err.unwrap_or_else(|| std::io::ErrorKind::NotConnected.into()),
        })
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                debug!("killing simulator process: {err}");
            }
            if let Err(err) = child.wait() {
                debug!("reaping simulator process: {err}");
            }
        }
    }
}

/// Polls `child` until it exits or `timeout` elapses; `None` if it is still running
fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

impl Simulator for TraciSimulator {
    fn start(&mut self, scenario: &Path) -> Result<(), SimError> {
        if self.conn.is_some() {
            self.close()?;
        }

        let port = match self.config.port {
            0 => Self::free_port()?,
            port => port,
        };

        let child = Process::new(&self.config.binary)
            .arg("-c")
            .arg(scenario)
            .arg("--remote-port")
            .arg(port.to_string())
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| SimError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;
        debug!("launched {} (pid {}) on port {port}", self.config.binary, child.id());
        self.child = Some(child);

        let mut conn = match self.connect(port) {
            Ok(conn) => conn,
            Err(err) => {
                self.kill_child();
                return Err(err);
            }
        };
        match conn.version() {
            Ok((api, server)) => info!("connected to {server} (TraCI API {api})"),
            Err(err) => {
                self.kill_child();
                return Err(err);
            }
        }
        self.conn = Some(conn);
        Ok(())
    }

    fn advance(&mut self) -> Result<(), SimError> {
        self.conn()?.simulation_step()
    }

    fn edge_vehicle_count(&mut self, edge: &str) -> Result<u32, SimError> {
        self.conn()?.edge_vehicle_number(edge)
    }

    fn edge_mean_speed(&mut self, edge: &str) -> Result<f64, SimError> {
        self.conn()?.edge_mean_speed(edge)
    }

    fn set_program(&mut self, signal: &str, program: &str) -> Result<(), SimError> {
        self.conn()?.set_traffic_light_program(signal, program)
    }

    fn close(&mut self) -> Result<(), SimError> {
        let result = match self.conn.take() {
            Some(conn) => conn.close(),
            None => Ok(()),
        };

        if let Some(mut child) = self.child.take() {
            let exited = match result {
                Ok(()) => wait_for_exit(&mut child, self.config.step_timeout),
                Err(_) => Ok(None),
            };
            match exited {
                Ok(Some(status)) if !status.success() => warn!("simulator exited with {status}"),
                Ok(Some(_)) => {}
                Ok(None) => {
                    if result.is_ok() {
                        warn!("simulator still running after close, killing it");
                    }
                    self.child = Some(child);
                    self.kill_child();
                }
                Err(err) => {
                    warn!("waiting for simulator: {err}");
                    self.child = Some(child);
                    self.kill_child();
                }
            }
        }
        result
    }
}

impl Drop for TraciSimulator {
    fn drop(&mut self) {
        self.kill_child();
    }
}
