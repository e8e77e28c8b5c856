use std::io::Cursor;
use std::time::Duration;
use streamrelay::config::VbanConfig;
use streamrelay::vban::protocol::{frame_number, HEADER_LEN};
use streamrelay::vban::{
    AudioFormat, EmitterSettings, RawPcmCapture, SampleEncoding, VbanEmitterHandle, VbanError,
};
use tokio::net::UdpSocket;
use tokio::time::timeout;

fn stereo_s16() -> AudioFormat {
    AudioFormat {
        sample_rate: 48000,
        encoding: SampleEncoding::S16,
        channels: 2,
    }
}

#[tokio::test]
async fn capture_buffer_is_split_into_frames() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = VbanConfig {
        enabled: true,
        destination: Some(receiver.local_addr().unwrap().ip()),
        port: receiver.local_addr().unwrap().port(),
        stream_name: "loopback".to_string(),
        ..VbanConfig::default()
    };

    // one buffer of 1024 stereo s16 samples splits into four 256-sample frames
    let pcm: Vec<u8> = (0..4096u32).map(|i| (i / 1024) as u8).collect();
    let capture = RawPcmCapture::new(Cursor::new(pcm), stereo_s16(), 1024);
    let mut emitter =
        VbanEmitterHandle::spawn(EmitterSettings::from_config(&config), Box::new(capture))
            .await
            .unwrap();

    let plan = emitter.chunk_plan().unwrap();
    assert_eq!(plan.divisor, 4);
    assert_eq!(plan.samples_per_chunk, 256);

    let mut buf = [0u8; 1500];
    for frame in 0..4u8 {
        let (len, from) = timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("no VBAN frame")
            .unwrap();
        assert_eq!(Some(from.port()), emitter.local_addr().map(|a| a.port()));
        assert_eq!(len, HEADER_LEN + 1024);
        assert_eq!(&buf[..4], b"VBAN");
        assert_eq!(buf[4], 3);
        assert_eq!(buf[5], 255);
        assert_eq!(buf[6], 1);
        assert_eq!(buf[7], 1);
        assert_eq!(&buf[8..16], b"loopback");
        assert_eq!(frame_number(&buf[..len]), Some(u32::from(frame) + 1));
        assert!(buf[HEADER_LEN..len].iter().all(|&b| b == frame));
    }

    let stats = emitter.shutdown().await.unwrap();
    assert_eq!(stats.buffers_received, 1);
    assert_eq!(stats.packets_sent, 4);
}

#[tokio::test]
async fn unsupported_format_fails_before_streaming() {
    let format = AudioFormat {
        sample_rate: 47999,
        ..stereo_s16()
    };
    let capture = RawPcmCapture::new(Cursor::new(vec![0u8; 64]), format, 16);
    let result = VbanEmitterHandle::spawn(
        EmitterSettings::from_config(&VbanConfig::default()),
        Box::new(capture),
    )
    .await;
    assert!(matches!(result, Err(VbanError::Format(_))));
}
