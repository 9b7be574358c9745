//! Byte streams survive a trip through both stream adapters.

mod common;

use std::io::{Cursor, Read};

use bytes::Bytes;
use proptest::prelude::*;
use warpgrid_bridge::{BridgeConfig, BridgeHandle, HostStreamReader, ReaderSource, TaskPool};
use warpgrid_host_api::{EventLoop, ReadableStream};

fn setup(chunk_size: usize) -> (EventLoop, TaskPool, BridgeHandle) {
    common::init_tracing();
    let event_loop = EventLoop::start().unwrap();
    let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
    let bridge = BridgeHandle::new(event_loop.handle(), pool.spawner()).with_chunk_size(chunk_size);
    (event_loop, pool, bridge)
}

/// Split `data` at the given cut points.
fn split(data: &[u8], cuts: &[usize]) -> Vec<Bytes> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain([data.len()]) {
        if cut > start {
            chunks.push(Bytes::copy_from_slice(&data[start..cut]));
            start = cut;
        }
    }
    chunks
}

/// Read `reader` to the end with a fixed-size buffer.
fn drain(mut reader: impl Read, buf_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: blocking reader → host stream → blocking reader is lossless.
    #[test]
    fn push_then_pull_is_lossless(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..64,
        buf_size in 1usize..96,
    ) {
        let (_event_loop, _pool, bridge) = setup(chunk_size);
        let stream = ReaderSource::new(Cursor::new(data.clone()), &bridge).into_stream();
        let out = drain(HostStreamReader::new(stream), buf_size);
        prop_assert_eq!(out, data);
    }

    /// Property: arbitrary host chunking, re-exposed to the host, then read
    /// back, yields the original bytes.
    #[test]
    fn host_chunks_survive_a_relay(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
        chunk_size in 1usize..64,
    ) {
        let (_event_loop, _pool, bridge) = setup(chunk_size);
        let host = bridge.host().clone();
        let source = ReadableStream::from_chunks(&host, split(&data, &cuts));

        let relayed = ReaderSource::new(HostStreamReader::new(source), &bridge).into_stream();
        let out = drain(HostStreamReader::new(relayed), 37);
        prop_assert_eq!(out, data);
    }
}

#[test]
fn closing_a_finished_stream_is_not_an_error() {
    let (_event_loop, _pool, bridge) = setup(8);
    let stream = ReaderSource::new(Cursor::new(b"done".to_vec()), &bridge).into_stream();
    let mut reader = HostStreamReader::new(stream);

    let mut body = Vec::new();
    reader.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"done");
    reader.close().unwrap();
    reader.close().unwrap();
}

#[test]
fn closing_mid_stream_cancels_the_source() {
    let (_event_loop, _pool, bridge) = setup(4);
    let stream = ReaderSource::new(Cursor::new(vec![7u8; 64]), &bridge).into_stream();
    let mut reader = HostStreamReader::new(stream.clone());

    let first = reader.read_chunk().unwrap().unwrap();
    assert_eq!(first.len(), 4);
    reader.close().unwrap();
    bridge.host().flush();
    assert!(stream.is_closed());
}
