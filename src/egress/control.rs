//! Minimal Tor control-port client

use super::EgressError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Asks the egress for a new circuit (`SIGNAL NEWNYM`)
///
/// Authenticates with `password` when given, otherwise with an empty
/// credential (the `CookieAuthentication 0`, no-password setup).
pub async fn request_new_identity(
    host: &str,
    port: u16,
    password: Option<&str>,
) -> Result<(), EgressError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| EgressError::Control(format!("connect {}:{}: {}", host, port, e)))?;

    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let auth = match password {
        Some(password) => format!("AUTHENTICATE \"{}\"", quote(password)),
        None => "AUTHENTICATE".to_string(),
    };

    command(&mut write, &mut lines, &auth).await?;
    command(&mut write, &mut lines, "SIGNAL NEWNYM").await?;

    // Closing politely is best effort; the rotation already happened
    let _ = write.write_all(b"QUIT\r\n").await;

    debug!(host, port, "Egress identity rotated");
    Ok(())
}

async fn command(
    write: &mut OwnedWriteHalf,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    line: &str,
) -> Result<(), EgressError> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\r\n").await?;

    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| EgressError::Control("connection closed".to_string()))?;

    if reply.starts_with("250") {
        Ok(())
    } else {
        // Never echo the password back into logs
        let verb = line.split_whitespace().next().unwrap_or_default();
        Err(EgressError::Rejected {
            command: verb.to_string(),
            reply,
        })
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
