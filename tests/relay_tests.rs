// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bsread_recorder::config::RelaySettings;
use bsread_recorder::relay::{load_channels, Forwarder, Ingester};
use bsread_recorder::stream::{memory_stream, StreamSource};
use bsread_recorder::{
    ChannelDefinition, ChannelType, Message, RelayBuffer, RelayService, SchemaHeader, Timestamp,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn message(pulse_id: u64) -> Message {
    Message::new(pulse_id, Timestamp::default(), vec![Some((pulse_id as i64).into())])
}

fn header() -> SchemaHeader {
    SchemaHeader::new(vec![ChannelDefinition::new("A", ChannelType::Int64, vec![1])])
}

#[test]
fn test_buffer_keeps_last_n_for_any_capacity() {
    for capacity in [1usize, 2, 5, 16, 100] {
        for extra in [1usize, 3, 250] {
            let buffer = RelayBuffer::new(capacity).unwrap();
            let total = capacity + extra;
            for i in 0..total {
                buffer.ingest(i);
            }

            let drained: Vec<_> = std::iter::from_fn(|| buffer.relay()).collect();
            let expected: Vec<_> = (total - capacity..total).collect();
            assert_eq!(drained, expected, "capacity {} extra {}", capacity, extra);
            assert_eq!(buffer.stats(), (total as u64, extra as u64));
        }
    }
}

#[test]
fn test_buffer_shared_between_threads() {
    let buffer = Arc::new(RelayBuffer::new(8).unwrap());

    let producer = {
        let buffer = buffer.clone();
        std::thread::spawn(move || {
            for i in 0..1000u32 {
                buffer.ingest(i);
            }
        })
    };
    producer.join().unwrap();

    assert_eq!(buffer.len(), 8);
    let drained: Vec<_> = std::iter::from_fn(|| buffer.relay()).collect();
    assert_eq!(drained, (992..1000).collect::<Vec<_>>());
}

#[test]
fn test_downstream_sees_header_after_eviction() {
    let buffer = RelayBuffer::new(3).unwrap();
    let mut ingester = Ingester::default();

    buffer.ingest(ingester.frame(message(0).with_header(header())));
    for pulse_id in 1..10 {
        buffer.ingest(ingester.frame(message(pulse_id)));
    }

    let mut forwarder = Forwarder::default();
    let forwarded: Vec<_> = std::iter::from_fn(|| buffer.relay())
        .map(|framed| forwarder.unframe(framed))
        .collect();

    assert_eq!(
        forwarded.iter().map(|m| m.pulse_id).collect::<Vec<_>>(),
        vec![7, 8, 9]
    );
    assert_eq!(forwarded[0].header, Some(header()));
    assert!(forwarded[1].header.is_none());
    assert!(forwarded[2].header.is_none());
}

#[test]
fn test_load_channel_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# machine channels").unwrap();
    writeln!(file, "SINEG01:A").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "SINEG01:B").unwrap();

    let channels = load_channels(file.path()).unwrap();
    assert_eq!(channels, vec!["SINEG01:A", "SINEG01:B"]);
}

#[test]
fn test_missing_channel_file() {
    assert!(load_channels("/nonexistent/channels.txt").is_err());
}

#[tokio::test]
async fn test_relay_end_to_end() {
    let settings = RelaySettings {
        capacity: 32,
        poll_interval_ms: 1,
        analyze: true,
        ..Default::default()
    };
    let service = Arc::new(RelayService::new(&settings, Duration::from_millis(10)).unwrap());

    let (input, source) = memory_stream();
    let (output, mut downstream) = memory_stream();

    let relay = service.clone();
    let handle =
        tokio::spawn(async move { relay.run(Box::new(source), Box::new(output)).await });

    input.push(message(0).with_header(header())).unwrap();
    for pulse_id in 1..20 {
        input.push(message(pulse_id)).unwrap();
    }

    let mut pulse_ids = Vec::new();
    while pulse_ids.len() < 20 {
        let msg = downstream
            .receive(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("relay stalled");
        if msg.pulse_id == 0 {
            assert_eq!(msg.header, Some(header()));
        }
        pulse_ids.push(msg.pulse_id);
    }
    assert_eq!(pulse_ids, (0..20).collect::<Vec<_>>());

    // Losing the input stream stops both workers with an error
    drop(input);
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());
    assert!(!service.is_running());
}

#[test]
fn test_zero_capacity_relay_rejected() {
    let settings = RelaySettings {
        capacity: 0,
        ..Default::default()
    };
    assert!(RelayService::new(&settings, Duration::from_millis(10)).is_err());
}
