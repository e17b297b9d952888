// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frame extraction from the child's stdout byte stream (§4.2).

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::envelope::StreamsResult;
use crate::error::ShellError;

/// Extracts head/tail-delimited envelope frames from the child's stdout and
/// decodes each into a [`StreamsResult`].
///
/// One decoder instance is owned by one child generation; it is discarded
/// (along with any partially buffered bytes) on restart, since a lone tail
/// with no preceding head in the new generation's stream would otherwise be
/// misread as leftover state from the old one.
pub(crate) struct FrameDecoder {
    head: String,
    tail: String,
}

impl FrameDecoder {
    pub(crate) fn new(head: String, tail: String) -> Self {
        Self { head, tail }
    }
}

impl Decoder for FrameDecoder {
    type Item = Result<StreamsResult, ShellError>;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(tail_rel) = find_subslice(buf, self.tail.as_bytes()) else {
                return Ok(None);
            };
            let tail_end = tail_rel + self.tail.len();

            let Some(head_rel) = find_subslice(&buf[..tail_rel], self.head.as_bytes()) else {
                // A tail with no preceding head: the wrapper never emitted a
                // matching head for this reply (or it arrived in an earlier
                // frame already consumed). Everything up to and including
                // this tail is unrecoverable and is discarded; the rest of
                // the buffer is preserved in case it holds a real frame.
                buf.advance(tail_end);
                continue;
            };

            let payload_start = head_rel + self.head.len();
            let payload = buf[payload_start..tail_rel].to_vec();
            buf.advance(tail_end);

            let payload = String::from_utf8_lossy(&payload).into_owned();
            return Ok(Some(crate::envelope::decode_envelope(&payload)));
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
