use bytes::{Bytes, BytesMut};

/// 单帧大小上限，超过即认为标记丢失
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// 寻找起始标记 FF D8
    Seeking,
    /// 已进入帧内，累积直到结束标记 FF D9
    Accumulating,
}

/// 扫描输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// 一段完整的 JPEG（含起止标记）
    Frame(Bytes),
    /// 当前帧超过上限被丢弃，携带已累积的字节数
    Oversized(usize),
}

/// JPEG 帧边界扫描器
///
/// 按块喂入任意切分的字节流，标记可以跨块出现。
pub struct JpegScanner {
    state: ScanState,
    buf: BytesMut,
    // 上一块的最后一个字节，用于匹配跨块的标记
    prev: Option<u8>,
    max_frame_bytes: usize,
}

impl JpegScanner {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }

    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            state: ScanState::Seeking,
            buf: BytesMut::with_capacity(64 * 1024),
            prev: None,
            max_frame_bytes,
        }
    }

    /// 当前是否处于帧内
    pub fn in_frame(&self) -> bool {
        self.state == ScanState::Accumulating
    }

    pub fn feed(&mut self, mut chunk: &[u8], out: &mut Vec<ScanEvent>) {
        while !chunk.is_empty() {
            match self.state {
                ScanState::Seeking => match find_marker(self.prev, chunk, SOI) {
                    Some(end) => {
                        self.buf.clear();
                        self.buf.extend_from_slice(&SOI);
                        self.state = ScanState::Accumulating;
                        self.prev = None;
                        chunk = &chunk[end..];
                    }
                    None => {
                        self.prev = chunk.last().copied();
                        return;
                    }
                },
                ScanState::Accumulating => match find_marker(self.prev, chunk, EOI) {
                    Some(end) => {
                        self.buf.extend_from_slice(&chunk[..end]);
                        chunk = &chunk[end..];
                        self.state = ScanState::Seeking;
                        self.prev = None;

                        if self.buf.len() > self.max_frame_bytes {
                            out.push(ScanEvent::Oversized(self.buf.len()));
                            self.buf.clear();
                        } else {
                            out.push(ScanEvent::Frame(self.buf.split().freeze()));
                        }
                    }
                    None => {
                        self.buf.extend_from_slice(chunk);
                        self.prev = chunk.last().copied();

                        if self.buf.len() > self.max_frame_bytes {
                            out.push(ScanEvent::Oversized(self.buf.len()));
                            self.buf.clear();
                            self.state = ScanState::Seeking;
                            self.prev = None;
                        }
                        return;
                    }
                },
            }
        }
    }
}

impl Default for JpegScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// 返回标记之后的偏移量
fn find_marker(prev: Option<u8>, chunk: &[u8], marker: [u8; 2]) -> Option<usize> {
    if prev == Some(marker[0]) && chunk.first() == Some(&marker[1]) {
        return Some(1);
    }
    chunk.windows(2).position(|w| w == marker).map(|i| i + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend_from_slice(body);
        data.extend_from_slice(&EOI);
        data
    }

    fn frames(events: &[ScanEvent]) -> Vec<Vec<u8>> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Frame(b) => Some(b.to_vec()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_frame_with_garbage_around() {
        let mut scanner = JpegScanner::new();
        let mut input = b"noise".to_vec();
        input.extend(jpeg(b"payload"));
        input.extend_from_slice(b"tail");

        let mut out = Vec::new();
        scanner.feed(&input, &mut out);

        assert_eq!(frames(&out), vec![jpeg(b"payload")]);
        assert!(!scanner.in_frame());
    }

    #[test]
    fn test_markers_split_across_chunks() {
        let mut scanner = JpegScanner::new();
        let data = jpeg(b"abc");
        let mut out = Vec::new();

        // 逐字节喂入，起止标记都被切开
        for byte in &data {
            scanner.feed(std::slice::from_ref(byte), &mut out);
        }

        assert_eq!(frames(&out), vec![data]);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut scanner = JpegScanner::new();
        let mut input = jpeg(b"one");
        input.extend(jpeg(b"two"));
        input.extend(jpeg(b"three"));

        let mut out = Vec::new();
        scanner.feed(&input[..7], &mut out);
        scanner.feed(&input[7..], &mut out);

        assert_eq!(frames(&out), vec![jpeg(b"one"), jpeg(b"two"), jpeg(b"three")]);
    }

    #[test]
    fn test_start_marker_does_not_close_frame() {
        // FF D8 D9 不是结束标记
        let mut scanner = JpegScanner::new();
        let mut out = Vec::new();
        scanner.feed(&[0xFF, 0xD8, 0xD9, 0x01, 0xFF, 0xD9], &mut out);
        assert_eq!(frames(&out), vec![vec![0xFF, 0xD8, 0xD9, 0x01, 0xFF, 0xD9]]);
    }

    #[test]
    fn test_oversized_frame_is_aborted_and_scanning_resumes() {
        let mut scanner = JpegScanner::with_limit(16);
        let mut out = Vec::new();

        scanner.feed(&SOI, &mut out);
        scanner.feed(&[0u8; 32], &mut out);
        assert!(matches!(out.as_slice(), [ScanEvent::Oversized(n)] if *n > 16));
        assert!(!scanner.in_frame());

        out.clear();
        scanner.feed(&jpeg(b"ok"), &mut out);
        assert_eq!(frames(&out), vec![jpeg(b"ok")]);
    }

    #[test]
    fn test_oversized_when_end_marker_in_same_chunk() {
        let mut scanner = JpegScanner::with_limit(8);
        let mut out = Vec::new();
        scanner.feed(&jpeg(&[7u8; 20]), &mut out);
        assert!(matches!(out.as_slice(), [ScanEvent::Oversized(24)]));
    }
}
