use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use thiserror::Error;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    codec::ClientCodec,
    error::{DecodeError, TransportError},
    message::{Inbound, Outbound},
};

/// Framed duplex stream to a relay: a `Stream` of relay frames and a `Sink`
/// of client frames.
pub type ClientConnection = Framed<TcpStream, ClientCodec>;

type FrameSink = SplitSink<ClientConnection, Inbound>;
type FrameStream = SplitStream<ClientConnection>;

/// Connects to a relay.
pub async fn dial(addr: SocketAddr) -> Result<ClientConnection, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Dial { addr, source })?;
    Ok(Framed::new(stream, ClientCodec::default()))
}

/// What the front-end knows about its own login.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientState {
    name: Option<String>,
}

impl ClientState {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.name.is_some()
    }

    /// Tracks login confirmations from the relay.
    pub fn observe(&mut self, frame: &Outbound) {
        match frame {
            Outbound::LoggedIn { name } => self.name = Some(name.clone()),
            Outbound::LoggedOut { .. } => self.name = None,
            Outbound::Answer { .. } | Outbound::Broadcast { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(Inbound),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("need login: /login <name> <password>")]
    NeedLogin,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("already logged out")]
    AlreadyLoggedOut,
    #[error("usage: /login <name> <password>")]
    LoginUsage,
    #[error("unknown command {0}; try /?")]
    UnknownCommand(String),
}

/// Turns one line typed by the user into a frame.
///
/// Returns `Ok(None)` for blank input.
pub fn parse_input(line: &str, state: &ClientState) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(command) = line.strip_prefix('/') else {
        let name = state.name().ok_or(InputError::NeedLogin)?;
        return Ok(Some(Input::Send(Inbound::Message {
            name: name.to_string(),
            text: line.to_string(),
        })));
    };

    let mut words = command.split_whitespace();
    let input = match words.next().unwrap_or_default() {
        "login" => {
            if state.is_logged_in() {
                return Err(InputError::AlreadyLoggedIn);
            }
            let (Some(name), Some(password), None) = (words.next(), words.next(), words.next())
            else {
                return Err(InputError::LoginUsage);
            };
            Input::Send(Inbound::Login {
                name: name.to_string(),
                password: Some(password.to_string()),
            })
        }
        "logout" => {
            let name = state.name().ok_or(InputError::AlreadyLoggedOut)?;
            Input::Send(Inbound::Logout {
                name: name.to_string(),
            })
        }
        "?" | "help" => Input::Send(Inbound::Help {
            name: state.name().unwrap_or_default().to_string(),
        }),
        "quit" => Input::Quit,
        other => return Err(InputError::UnknownCommand(format!("/{other}"))),
    };
    Ok(Some(input))
}

/// Line-oriented terminal front-end: stdin lines go to the relay, relay
/// frames are printed to stdout.
pub async fn run(args: ClientArgs) -> Result<()> {
    let connection = dial(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (mut sink, mut frames) = connection.split();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut state = ClientState::default();

    run_client_loop(&mut frames, &mut sink, &mut stdin, &mut state).await?;
    shutdown_connection(&mut sink).await;

    Ok(())
}

async fn run_client_loop(
    frames: &mut FrameStream,
    sink: &mut FrameSink,
    stdin: &mut io::Lines<BufReader<io::Stdin>>,
    state: &mut ClientState,
) -> Result<()> {
    loop {
        select! {
            frame = frames.next() => {
                if !handle_server_frame(frame, state).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_line(line?, state, sink).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(
    frame: Option<Result<Result<Outbound, DecodeError>, TransportError>>,
    state: &mut ClientState,
) -> Result<bool> {
    match frame {
        Some(Ok(Ok(frame))) => {
            state.observe(&frame);
            render_server_frame(frame).await?;
            Ok(true)
        }
        Some(Ok(Err(err))) => {
            warn!(error = %err, "ignoring undecodable frame from server");
            Ok(true)
        }
        Some(Err(err)) => Err(err).context("lost connection to server"),
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_line(
    line: Option<String>,
    state: &ClientState,
    sink: &mut FrameSink,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    match parse_input(&line, state) {
        Ok(None) => Ok(true),
        Ok(Some(Input::Quit)) => {
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Ok(Some(Input::Send(frame))) => {
            sink.send(frame).await.context("failed to send to server")?;
            Ok(true)
        }
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(sink: &mut FrameSink) {
    if let Err(error) = sink.close().await {
        warn!(%error, "failed to shut down connection cleanly");
    }
}

async fn render_server_frame(frame: Outbound) -> io::Result<()> {
    match frame {
        Outbound::LoggedIn { name } => write_stdout(&format!("*** logged in as {name}")).await,
        Outbound::LoggedOut { .. } => write_stdout("*** logged out").await,
        Outbound::Broadcast { name, text } => write_stdout(&format!("<{name}> {text}")).await,
        Outbound::Answer {
            text, error: None, ..
        } => write_stdout(&format!("server: {text}")).await,
        Outbound::Answer {
            text,
            error: Some(_),
            ..
        } => write_stderr(&format!("!!! {text}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in_as(name: &str) -> ClientState {
        let mut state = ClientState::default();
        state.observe(&Outbound::LoggedIn { name: name.into() });
        state
    }

    #[test]
    fn plain_text_requires_login() {
        let anonymous = ClientState::default();
        assert_eq!(parse_input("hello", &anonymous), Err(InputError::NeedLogin));

        let alice = logged_in_as("alice");
        assert_eq!(
            parse_input("  hello there ", &alice),
            Ok(Some(Input::Send(Inbound::Message {
                name: "alice".into(),
                text: "hello there".into()
            })))
        );
    }

    #[test]
    fn login_needs_exactly_name_and_password() {
        let anonymous = ClientState::default();
        assert_eq!(
            parse_input("/login alice secret", &anonymous),
            Ok(Some(Input::Send(Inbound::Login {
                name: "alice".into(),
                password: Some("secret".into())
            })))
        );
        assert_eq!(
            parse_input("/login alice", &anonymous),
            Err(InputError::LoginUsage)
        );
        assert_eq!(
            parse_input("/login alice secret extra", &anonymous),
            Err(InputError::LoginUsage)
        );
        assert_eq!(
            parse_input("/login bob pw", &logged_in_as("alice")),
            Err(InputError::AlreadyLoggedIn)
        );
    }

    #[test]
    fn logout_tracks_local_state() {
        assert_eq!(
            parse_input("/logout", &ClientState::default()),
            Err(InputError::AlreadyLoggedOut)
        );

        let mut state = logged_in_as("alice");
        assert_eq!(
            parse_input("/logout", &state),
            Ok(Some(Input::Send(Inbound::Logout {
                name: "alice".into()
            })))
        );
        state.observe(&Outbound::LoggedOut {
            name: "alice".into(),
        });
        assert!(!state.is_logged_in());
    }

    #[test]
    fn commands_and_blank_lines() {
        let state = ClientState::default();
        assert_eq!(parse_input("   ", &state), Ok(None));
        assert_eq!(parse_input("/quit", &state), Ok(Some(Input::Quit)));
        assert_eq!(
            parse_input("/?", &state),
            Ok(Some(Input::Send(Inbound::Help {
                name: String::new()
            })))
        );
        assert_eq!(
            parse_input("/dance", &state),
            Err(InputError::UnknownCommand("/dance".into()))
        );
    }

    #[test]
    fn broadcasts_and_answers_leave_state_alone() {
        let mut state = logged_in_as("alice");
        state.observe(&Outbound::Broadcast {
            name: "bob".into(),
            text: "Logged out".into(),
        });
        state.observe(&Outbound::answer("", "hi"));
        assert_eq!(state.name(), Some("alice"));
    }
}
