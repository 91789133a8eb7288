//! Challenge and `connect` exchange, run before the receive loop starts.

use std::collections::VecDeque;

use tokio::sync::{broadcast, watch};

use super::ClientOptions;
use crate::error::{GatewayError, Result};
use crate::identity::DeviceIdentity;
use crate::protocol::{
    ConnectParams, ConnectionState, EventFrame, Frame, HandshakeInput, HelloOk, RequestFrame,
    ResponseFrame, ValueExt, CHALLENGE_EVENT, CONNECT_METHOD, HANDSHAKE_REQUEST_ID,
    MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
use crate::token::TokenStore;
use crate::transport::{MessageSink, MessageStream, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Cached,
    Shared,
    Absent,
}

/// Everything one handshake needs, borrowed from the client.
pub(crate) struct Handshake<'a> {
    pub options: &'a ClientOptions,
    pub instance_id: &'a str,
    pub identity: &'a DeviceIdentity,
    pub token_store: &'a dyn TokenStore,
    pub events: &'a broadcast::Sender<EventFrame>,
    pub state: &'a watch::Sender<ConnectionState>,
}

impl Handshake<'_> {
    /// Drive `AwaitingChallenge -> Authenticating` and return the `hello-ok`.
    pub async fn run(
        &self,
        sink: &mut dyn MessageSink,
        stream: &mut dyn MessageStream,
    ) -> Result<HelloOk> {
        let mut backlog = VecDeque::new();

        self.state.send_replace(ConnectionState::AwaitingChallenge);
        let nonce = self.await_challenge(stream, &mut backlog).await?;

        self.state.send_replace(ConnectionState::Authenticating);
        self.authenticate(sink, stream, &mut backlog, nonce.as_deref())
            .await
    }

    /// Read one frame, bounded by the challenge timeout.
    ///
    /// A challenge yields its nonce. Any other frame goes to `backlog` so it
    /// is processed as if it had arrived after the `connect` request.
    async fn await_challenge(
        &self,
        stream: &mut dyn MessageStream,
        backlog: &mut VecDeque<Frame>,
    ) -> Result<Option<String>> {
        let first =
            match tokio::time::timeout(self.options.challenge_timeout, next_frame(stream)).await {
                Ok(frame) => frame?,
                Err(_) => {
                    tracing::debug!(
                        timeout = ?self.options.challenge_timeout,
                        "no challenge received, connecting without nonce"
                    );
                    return Ok(None);
                }
            };

        if let Frame::Event(event) = &first {
            if event.event == CHALLENGE_EVENT {
                match event.payload.as_ref().map(|p| p.str_field("nonce")) {
                    Some(Ok(nonce)) => {
                        tracing::debug!("received connect challenge");
                        return Ok(Some(nonce.to_string()));
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "challenge without usable nonce"),
                    None => tracing::warn!("challenge without payload"),
                }
            }
        }

        tracing::debug!(kind = first.kind(), "first frame is not a challenge, keeping it");
        backlog.push_back(first);
        Ok(None)
    }

    async fn authenticate(
        &self,
        sink: &mut dyn MessageSink,
        stream: &mut dyn MessageStream,
        backlog: &mut VecDeque<Frame>,
        nonce: Option<&str>,
    ) -> Result<HelloOk> {
        let options = self.options;
        let device_id = self.identity.device_id.as_str();

        let cached = self.token_store.load(device_id, &options.role);
        let (token, source) = match (&cached, &options.shared_token) {
            (Some(cached), _) => (Some(cached.token.as_str()), TokenSource::Cached),
            (None, Some(shared)) => (Some(shared.as_str()), TokenSource::Shared),
            (None, None) => (None, TokenSource::Absent),
        };

        let input = HandshakeInput {
            client_id: &options.client_id,
            client_mode: &options.client_mode,
            display_name: options.display_name.as_deref(),
            instance_id: self.instance_id,
            role: &options.role,
            scopes: &options.scopes,
            token,
            challenge_nonce: nonce,
            locale: options.locale.as_deref(),
        };
        let params = ConnectParams::build(&input, self.identity);
        let attested = params.device.is_some();
        let frame = Frame::Request(RequestFrame::new(
            HANDSHAKE_REQUEST_ID,
            CONNECT_METHOD,
            Some(serde_json::to_value(&params)?),
        ));
        sink.send(WireMessage::Text(frame.to_text()?)).await?;
        tracing::info!(
            device_id,
            role = %options.role,
            token = ?source,
            challenged = nonce.is_some(),
            attested,
            "connect sent"
        );

        let response =
            tokio::time::timeout(options.connect_timeout, self.await_response(stream, backlog))
                .await
                .map_err(|_| {
                    GatewayError::Handshake(format!(
                        "no connect response within {:?}",
                        options.connect_timeout
                    ))
                })??;

        if !response.ok {
            let error = response.error.unwrap_or_default();
            if source == TokenSource::Cached {
                self.token_store.clear(device_id, &options.role);
                tracing::info!(device_id, role = %options.role, "cleared rejected device token");
            }
            return Err(GatewayError::Handshake(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let payload = response.payload.ok_or_else(|| {
            GatewayError::Handshake("connect response has no hello-ok payload".to_string())
        })?;
        let hello: HelloOk = serde_json::from_value(payload)
            .map_err(|e| GatewayError::Handshake(format!("malformed hello-ok: {e}")))?;
        hello.check_protocol(MIN_PROTOCOL_VERSION, PROTOCOL_VERSION)?;

        if let Some(grant) = &hello.auth {
            if let Some(device_token) = &grant.device_token {
                let role = grant.role.as_deref().unwrap_or(&options.role);
                let entry = self
                    .token_store
                    .store(device_id, role, device_token, &grant.scopes);
                tracing::debug!(device_id, role = %entry.role, scopes = entry.scopes.len(), "stored device token");
            }
        }

        Ok(hello)
    }

    /// Wait for the response to the handshake request.
    ///
    /// Events are published as they arrive; stray responses are dropped.
    async fn await_response(
        &self,
        stream: &mut dyn MessageStream,
        backlog: &mut VecDeque<Frame>,
    ) -> Result<ResponseFrame> {
        loop {
            let frame = match backlog.pop_front() {
                Some(frame) => frame,
                None => next_frame(stream).await?,
            };
            match frame {
                Frame::Response(response) if response.id == HANDSHAKE_REQUEST_ID => {
                    return Ok(response)
                }
                Frame::Response(response) => {
                    tracing::warn!(id = %response.id, "dropping response during handshake");
                }
                Frame::Event(event) => publish_event(self.events, event),
                Frame::Request(request) => {
                    tracing::warn!(id = %request.id, method = %request.method, "ignoring request frame from server");
                }
            }
        }
    }
}

/// Next frame from the stream, skipping control messages and unknown frame types.
async fn next_frame(stream: &mut dyn MessageStream) -> Result<Frame> {
    loop {
        match stream.next_message().await {
            None => {
                return Err(GatewayError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(WireMessage::Text(text))) => {
                if let Some(frame) = Frame::decode_text(&text)? {
                    return Ok(frame);
                }
            }
            Some(Ok(WireMessage::Binary(data))) => {
                if let Some(frame) = Frame::decode_slice(&data)? {
                    return Ok(frame);
                }
            }
            Some(Ok(WireMessage::Ping(_) | WireMessage::Pong(_))) => {}
        }
    }
}

/// Deliver an event to every current subscriber.
pub(crate) fn publish_event(events: &broadcast::Sender<EventFrame>, event: EventFrame) {
    tracing::trace!(event = %event.event, seq = ?event.seq, "event");
    // No subscribers is fine.
    let _ = events.send(event);
}
