//! The control channel
//!
//! A Unix socket accepting newline-delimited JSON route requests, the
//! userspace stand-in for a kernel config channel. Every request is answered
//! with a single JSON line carrying the stable admin code (0 on success) so
//! scripted callers can match on numbers instead of prose.
//!
//! ```text
//! {"action":"add","l4_proto":"tcp","l3_proto":"ipv6","v4":"192.0.2.1#8080","v6":"2001:db8::1#8080"}
//! {"code":0}
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::nat::routes::{AdminError, RouteRequest};
use crate::nat::Nat64;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),
}

/// What a request asks to do with its route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    Add,
    Remove,
}

/// One line of the control protocol, request side
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: RouteAction,
    #[serde(flatten)]
    pub route: RouteRequest,
}

/// One line of the control protocol, response side
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    /// 0 on success, otherwise a stable `AdminError` code
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accept and serve admin connections until the listener dies
pub async fn serve(nat: Arc<Nat64>, socket_path: &Path) -> Result<(), ControlError> {
    // A stale socket from a previous run would make the bind fail
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    log::info!("Listening for route requests on {}", socket_path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let nat = nat.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_client(nat, stream).await {
                log::warn!("Control client failed: {}", error);
            }
        });
    }
}

async fn handle_client(nat: Arc<Nat64>, stream: UnixStream) -> Result<(), ControlError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                log::debug!("Control request: {:?}", request);
                let result = match request.action {
                    RouteAction::Add => nat.add_static_route(&request.route),
                    RouteAction::Remove => nat.delete_static_route(&request.route),
                };
                match result {
                    Ok(()) => ControlResponse {
                        code: 0,
                        error: None,
                    },
                    Err(error) => ControlResponse {
                        code: error.code(),
                        error: Some(error.to_string()),
                    },
                }
            }
            Err(error) => ControlResponse {
                code: AdminError::InvalidArg(String::new()).code(),
                error: Some(format!("could not parse the request: {}", error)),
            },
        };

        let mut data = serde_json::to_vec(&response)?;
        data.push(b'\n');
        write_half.write_all(&data).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::pool4::Ipv4Pool;
    use crate::nat::pool6::PrefixPool;
    use crate::nat::Timeouts;

    fn test_nat() -> Arc<Nat64> {
        let pool4 = Ipv4Pool::new(&["192.0.2.1/32".parse().unwrap()], 8000, 8999, 1).unwrap();
        let pool6 = PrefixPool::with_prefixes(&["64:ff9b::/96".parse().unwrap()]).unwrap();
        Arc::new(Nat64::new(pool4, pool6, Timeouts::default()))
    }

    async fn roundtrip(stream: &mut UnixStream, request: &str) -> ControlResponse {
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();

        let mut response = String::new();
        let mut reader = BufReader::new(stream);
        reader.read_line(&mut response).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let socket_path = std::env::temp_dir().join(format!(
            "statemask-control-test-{}.sock",
            std::process::id()
        ));

        let nat = test_nat();
        let server = tokio::spawn({
            let nat = nat.clone();
            let socket_path = socket_path.clone();
            async move {
                let _ = serve(nat, &socket_path).await;
            }
        });

        // The listener needs a beat to bind
        let mut stream = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        // A well-formed add
        let response = roundtrip(
            &mut stream,
            r#"{"action":"add","l4_proto":"tcp","l3_proto":"ipv6","v4":"192.0.2.1#8080","v6":"2001:db8::1#8080"}"#,
        )
        .await;
        assert_eq!(response.code, 0);
        assert!(nat
            .bib_get_by_v6(&"2001:db8::1#8080".parse().unwrap(), rfc6146::L4Proto::Tcp)
            .is_some());

        // The same add again trips the duplicate check, code intact
        let response = roundtrip(
            &mut stream,
            r#"{"action":"add","l4_proto":"tcp","l3_proto":"ipv6","v4":"192.0.2.1#8080","v6":"2001:db8::1#8080"}"#,
        )
        .await;
        assert_eq!(response.code, AdminError::AlreadyExists.code());

        // Remove it by the v4 side
        let response = roundtrip(
            &mut stream,
            r#"{"action":"remove","l4_proto":"tcp","l3_proto":"ipv4","v4":"192.0.2.1#8080"}"#,
        )
        .await;
        assert_eq!(response.code, 0);

        // Garbage is answered, not dropped
        let response = roundtrip(&mut stream, r#"{"action":"explode"}"#).await;
        assert_eq!(response.code, -22);

        server.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
}
