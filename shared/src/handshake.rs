//! Connection validation handshake
//!
//! Before any message traffic the server sends a random 64-bit challenge and
//! the client must answer with [`scramble`] of it. This is a sanity check that
//! the peer speaks the protocol, not authentication: nothing is secret.
//!
//! ```text
//! server -> client : challenge        (8 bytes, host endian)
//! client -> server : scramble(value)  (8 bytes, host endian)
//! ```

use crate::error::{NetError, Result};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encoded size of a challenge or an answer
pub const HANDSHAKE_SIZE: usize = 8;

/// Fixed bit-scramble applied to the challenge by both sides
pub fn scramble(input: u64) -> u64 {
    let out = input ^ 0x8084_A1AE_B057_74E3;
    let out = (out & 0xAFD6_C6A5_A4DA_07B7) >> 4 | (out & 0xB2C0_E02A_A82E_CB8F) << 4;
    out ^ 0xDC91_D19D_4907_AFE9
}

/// Handshake scratch state held by a connection while it validates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Value this side writes: the challenge on the server, the answer on the client
    pub outgoing: u64,
    /// Precomputed answer the server expects; `None` on the client
    pub expected: Option<u64>,
    /// Last value read from the peer
    pub received: Option<u64>,
}

impl Handshake {
    /// Server-side state with a fresh random challenge
    pub fn server() -> Self {
        Self::with_challenge(rand::random())
    }

    pub fn with_challenge(challenge: u64) -> Self {
        Self {
            outgoing: challenge,
            expected: Some(scramble(challenge)),
            received: None,
        }
    }

    pub fn client() -> Self {
        Self::default()
    }

    /// Compares the peer's answer with the precomputed one
    pub fn verify(&self, answer: u64) -> Result<()> {
        match self.expected {
            Some(expected) if expected == answer => Ok(()),
            Some(expected) => Err(NetError::HandshakeRejected {
                expected,
                received: answer,
            }),
            // Clients never judge the server.
            None => Ok(()),
        }
    }

    /// Server side: send the challenge, read the answer, verify it
    pub async fn challenge<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_value(writer, self.outgoing).await?;
        let answer = read_value(reader).await?;
        self.received = Some(answer);
        self.verify(answer)
    }

    /// Client side: read the challenge and send back its scramble
    pub async fn respond<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let challenge = read_value(reader).await?;
        self.received = Some(challenge);
        self.outgoing = scramble(challenge);
        debug!("Answering handshake challenge {:#018x}", challenge);
        write_value(writer, self.outgoing).await
    }
}

async fn read_value<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(u64::from_ne_bytes(buf))
}

async fn write_value<W: AsyncWrite + Unpin>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_ne_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_scramble_reference_values() {
        assert_eq!(scramble(0), 0xd49b_9b37_0362_8793);
        assert_eq!(scramble(0x0123_4567_89AB_CDEF), 0xd48f_bd57_dbca_3f39);
        assert_eq!(scramble(u64::MAX), 0xfa64_f5fd_dbcf_1f18);
    }

    #[test]
    fn test_scramble_is_deterministic() {
        for challenge in [1u64, 42, 0xdead_beef, u64::MAX / 3] {
            assert_eq!(scramble(challenge), scramble(challenge));
        }
    }

    #[test]
    fn test_independent_states_agree() {
        let server = Handshake::with_challenge(0x1234);
        let other = Handshake::with_challenge(0x1234);
        assert_eq!(server.expected, other.expected);
        assert_ok!(server.verify(scramble(0x1234)));
    }

    #[test]
    fn test_verify_rejects_wrong_answer() {
        let server = Handshake::with_challenge(7);
        match server.verify(7) {
            Err(NetError::HandshakeRejected { expected, received }) => {
                assert_eq!(expected, scramble(7));
                assert_eq!(received, 7);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_client_accepts_anything() {
        assert_ok!(Handshake::client().verify(0));
    }

    #[tokio::test]
    async fn test_full_exchange_over_pipe() {
        let (server_io, client_io) = duplex(64);
        let (mut server_rx, mut server_tx) = split(server_io);
        let (mut client_rx, mut client_tx) = split(client_io);

        let mut server = Handshake::server();
        let mut client = Handshake::client();

        let (server_result, client_result) = tokio::join!(
            server.challenge(&mut server_rx, &mut server_tx),
            client.respond(&mut client_rx, &mut client_tx),
        );

        assert_ok!(server_result);
        assert_ok!(client_result);
        assert_eq!(client.received, Some(server.outgoing));
        assert_eq!(server.received, Some(client.outgoing));
    }

    #[tokio::test]
    async fn test_wrong_answer_over_pipe() {
        let (server_io, mut peer) = duplex(64);
        let (mut server_rx, mut server_tx) = split(server_io);
        let mut server = Handshake::with_challenge(99);

        let impostor = async {
            let mut buf = [0u8; HANDSHAKE_SIZE];
            peer.read_exact(&mut buf).await.unwrap();
            // Echo the challenge back instead of scrambling it.
            peer.write_all(&buf).await.unwrap();
        };

        let (result, _) = tokio::join!(server.challenge(&mut server_rx, &mut server_tx), impostor);
        assert_err!(&result);
        assert!(matches!(result, Err(NetError::HandshakeRejected { .. })));
    }

    #[tokio::test]
    async fn test_peer_hangs_up_mid_handshake() {
        let (server_io, peer) = duplex(64);
        let (mut server_rx, mut server_tx) = split(server_io);
        drop(peer);

        let mut server = Handshake::server();
        let result = server.challenge(&mut server_rx, &mut server_tx).await;
        assert_err!(&result);
    }
}
