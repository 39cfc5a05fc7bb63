//! Interactive terminal session with an attached container.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;

/// Copy `input` to the container and the container's output to `output`
/// until either direction reaches end of stream.
pub async fn run_session<S, I, O>(stream: S, mut input: I, mut output: O) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut from_container, mut to_container) = tokio::io::split(stream);

    let upstream = async {
        let sent = tokio::io::copy(&mut input, &mut to_container).await?;
        to_container.shutdown().await?;
        Ok::<_, std::io::Error>(sent)
    };
    let downstream = async {
        let received = tokio::io::copy(&mut from_container, &mut output).await?;
        output.flush().await?;
        Ok::<_, std::io::Error>(received)
    };

    tokio::select! {
        sent = upstream => debug!(bytes = sent?, "input closed; detaching"),
        received = downstream => debug!(bytes = received?, "container closed the session"),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn container_output_reaches_caller() {
        let (local, mut peer) = tokio::io::duplex(64);
        let (_keep_open, idle_input) = tokio::io::duplex(64);

        peer.write_all(b"login: ").await.unwrap();
        drop(peer);

        let mut output = Vec::new();
        run_session(local, idle_input, &mut output).await.unwrap();
        assert_eq!(output, b"login: ");
    }

    #[tokio::test]
    async fn caller_input_reaches_container() {
        let (local, mut peer) = tokio::io::duplex(64);

        let mut output = Vec::new();
        run_session(local, &b"ls\n"[..], &mut output).await.unwrap();

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ls\n");
        assert!(output.is_empty());
    }
}
