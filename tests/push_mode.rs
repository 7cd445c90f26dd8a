mod common;

use std::sync::Arc;

use common::Collector;
use dvdemux::common::errors::{ErrorDomain, FlowError};
use dvdemux::configs::SchedulingPreference;
use dvdemux::demux::constants::{NTSC_FRAME_SIZE, PAL_FRAME_SIZE, SECOND};
use dvdemux::demux::synth::FrameBuilder;
use dvdemux::demux::{
    ActiveMode, BusMessage, Caps, DvDemux, DvSystem, Format, InputChunk, SeekEvent, SegmentEvent,
    StreamEvent, StreamKind,
};
use dvdemux::source::MemorySource;

fn push_demux(collector: &Arc<Collector>, source: &Arc<MemorySource>) -> DvDemux {
    let demux = DvDemux::new(collector.clone(), source.clone());
    assert_eq!(
        demux.activate(SchedulingPreference::Auto).unwrap(),
        ActiveMode::Push
    );
    demux
}

fn feed(demux: &DvDemux, data: &[u8], chunk_size: usize) {
    for chunk in data.chunks(chunk_size) {
        demux.chain(InputChunk::new(chunk.to_vec())).unwrap();
    }
}

#[test]
fn odd_sized_chunks_make_whole_frames() {
    let collector = Collector::new();
    let data = FrameBuilder::new(DvSystem::Ntsc)
        .audio(48_000, 1_602)
        .build_stream(30);
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    feed(&demux, &data, 4_093);
    assert!(demux.sink_event(StreamEvent::Eos));

    let video = collector.buffers(StreamKind::Video);
    assert_eq!(video.len(), 30);
    assert!(video.iter().all(|b| b.data.len() == NTSC_FRAME_SIZE));
    for pair in video.windows(2) {
        assert_eq!(pair[0].pts + pair[0].duration, pair[1].pts);
        assert_eq!(pair[0].offset + 1, pair[1].offset);
    }
    assert_eq!(video[29].pts + video[29].duration, 1_001_000_000);

    let samples: u64 = collector
        .buffers(StreamKind::Audio)
        .iter()
        .map(|b| b.offset_end - b.offset)
        .sum();
    assert_eq!(samples, 30 * 1_602);
    assert!(collector.has_eos(StreamKind::Audio));
}

#[test]
fn system_change_renegotiates_video() {
    let collector = Collector::new();
    let pal = FrameBuilder::new(DvSystem::Pal).audio(48_000, 1_920);
    let ntsc = FrameBuilder::new(DvSystem::Ntsc).audio(48_000, 1_602);
    let mut data = pal.build_stream(2);
    data.extend(ntsc.build_stream(2));
    data.extend(pal.build());
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    feed(&demux, &data, 7_000);
    assert!(demux.sink_event(StreamEvent::Eos));

    let sizes: Vec<usize> = collector
        .buffers(StreamKind::Video)
        .iter()
        .map(|b| b.data.len())
        .collect();
    assert_eq!(
        sizes,
        [PAL_FRAME_SIZE, PAL_FRAME_SIZE, NTSC_FRAME_SIZE, NTSC_FRAME_SIZE, PAL_FRAME_SIZE]
    );

    let heights: Vec<u32> = collector
        .caps(StreamKind::Video)
        .iter()
        .map(|caps| match caps {
            Caps::Video { height, .. } => *height,
            Caps::Audio { .. } => 0,
        })
        .collect();
    assert_eq!(heights, [576, 480, 576]);

    let samples: Vec<u64> = collector
        .buffers(StreamKind::Audio)
        .iter()
        .map(|b| b.offset_end - b.offset)
        .collect();
    assert_eq!(samples, [1_920, 1_920, 1_602, 1_602, 1_920]);
    assert_eq!(collector.caps(StreamKind::Audio), [Caps::audio(48_000, 2)]);
}

#[test]
fn audio_rate_and_aspect_changes_renegotiate() {
    let collector = Collector::new();
    let mut data = FrameBuilder::new(DvSystem::Pal)
        .audio(48_000, 1_920)
        .build_stream(2);
    data.extend(
        FrameBuilder::new(DvSystem::Pal)
            .audio(32_000, 1_280)
            .wide(true)
            .build_stream(2),
    );
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    feed(&demux, &data, PAL_FRAME_SIZE);

    assert_eq!(
        collector.caps(StreamKind::Audio),
        [Caps::audio(48_000, 2), Caps::audio(32_000, 2)]
    );
    let samples: Vec<u64> = collector
        .buffers(StreamKind::Audio)
        .iter()
        .map(|b| b.offset_end - b.offset)
        .collect();
    assert_eq!(samples, [1_920, 1_920, 1_280, 1_280]);

    let (fps_n, fps_d) = DvSystem::Pal.framerate();
    assert_eq!(
        collector.caps(StreamKind::Video),
        [
            Caps::video(576, (fps_n, fps_d), DvSystem::Pal.pixel_aspect_ratio(false)),
            Caps::video(576, (fps_n, fps_d), DvSystem::Pal.pixel_aspect_ratio(true)),
        ]
    );
}

#[test]
fn new_recording_marks_discont() {
    let collector = Collector::new();
    let plain = FrameBuilder::new(DvSystem::Pal).build();
    let marked = FrameBuilder::new(DvSystem::Pal).new_media(true).build();
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    for frame in [&marked, &plain, &marked, &plain, &plain, &marked] {
        demux.chain(InputChunk::new(frame.clone())).unwrap();
    }

    let flags: Vec<bool> = collector
        .buffers(StreamKind::Video)
        .iter()
        .map(|b| b.discont)
        .collect();
    assert_eq!(flags, [true, false, false, false, false, true]);
}

#[test]
fn discont_chunk_resyncs() {
    let collector = Collector::new();
    let frame = FrameBuilder::new(DvSystem::Pal).build();
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    demux
        .chain(InputChunk::new(frame[..70_000].to_vec()))
        .unwrap();
    demux
        .chain(InputChunk::new(frame.clone()).discontinuous())
        .unwrap();
    demux
        .chain(InputChunk::new(frame).with_pts(3 * SECOND))
        .unwrap();

    let video = collector.buffers(StreamKind::Video);
    assert_eq!(video.len(), 2);
    assert_eq!(video[1].pts, 3 * SECOND);
}

#[test]
fn upstream_byte_segment_becomes_time_segment() {
    let collector = Collector::new();
    let data = FrameBuilder::new(DvSystem::Pal).build_stream(30);
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    feed(&demux, &data[..PAL_FRAME_SIZE], PAL_FRAME_SIZE);
    collector.clear();

    // What upstream sends after performing a flushing byte seek.
    assert!(demux.sink_event(StreamEvent::FlushStart));
    assert!(demux.sink_event(StreamEvent::FlushStop));
    assert!(demux.sink_event(StreamEvent::Segment(SegmentEvent {
        update: false,
        rate: 1.0,
        format: Format::Bytes,
        start: 25 * PAL_FRAME_SIZE as u64,
        stop: None,
        time: 0,
    })));
    feed(&demux, &data[25 * PAL_FRAME_SIZE..], 10_000);

    let events = collector.events(StreamKind::Video);
    assert_eq!(events[0], StreamEvent::FlushStart);
    assert_eq!(events[1], StreamEvent::FlushStop);
    let StreamEvent::Segment(segment) = &events[2] else {
        panic!("expected a segment, got {:?}", events[2]);
    };
    assert_eq!((segment.format, segment.start), (Format::Time, SECOND));

    let video = collector.buffers(StreamKind::Video);
    assert_eq!(video.len(), 5);
    assert_eq!((video[0].pts, video[0].offset), (SECOND, 25));
}

#[test]
fn parked_seek_is_forwarded_upstream_in_bytes() {
    let collector = Collector::new();
    let data = FrameBuilder::new(DvSystem::Pal).build_stream(2);
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    let seek = SeekEvent::time(SECOND, Some(2 * SECOND)).flushing();
    demux.send_seek(seek.clone()).unwrap();
    assert!(source.seeks().is_empty());

    feed(&demux, &data, 100_000);

    let seeks = source.seeks();
    assert_eq!(seeks.len(), 2);
    assert_eq!(seeks[0], seek);
    assert_eq!(seeks[1].format, Format::Bytes);
    assert_eq!(seeks[1].start, 25 * PAL_FRAME_SIZE as u64);
    assert_eq!(seeks[1].stop, Some(50 * PAL_FRAME_SIZE as u64));
    assert!(seeks[1].flags.flush);
}

#[test]
fn seek_after_header_goes_straight_upstream() {
    let collector = Collector::new();
    let data = FrameBuilder::new(DvSystem::Ntsc).build();
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);
    feed(&demux, &data, data.len());

    demux
        .pad_seek(
            StreamKind::Video,
            SeekEvent::new(Format::Default, 30, None),
        )
        .unwrap();
    let seeks = source.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].start, 30 * NTSC_FRAME_SIZE as u64);
}

#[test]
fn corrupt_input_stops_with_error() {
    let collector = Collector::new();
    let mut data = FrameBuilder::new(DvSystem::Pal).build();
    data.extend(vec![0xff; PAL_FRAME_SIZE]);
    let source = Arc::new(MemorySource::push_only(Vec::new()));
    let demux = push_demux(&collector, &source);

    let result = demux.chain(InputChunk::new(data));
    assert!(matches!(result, Err(FlowError::Error(_))));
    assert_eq!(collector.buffers(StreamKind::Video).len(), 1);
    assert!(collector.has_eos(StreamKind::Video));

    match demux.bus().try_recv().unwrap() {
        BusMessage::Error { domain, detail } => {
            assert_eq!(domain, ErrorDomain::Decode);
            assert!(detail.contains("DV header"), "{detail}");
        }
        other => panic!("unexpected bus message {:?}", other),
    }
}
