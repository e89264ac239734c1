//! テスト用の擬似デバイス
//!
//! カーネルドライバの振る舞いをメモリ上で再現し、呼び出し履歴を記録する

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    io,
    rc::Rc,
    time::Duration,
};

use crate::{
    cancel::CancelToken,
    driver::{BufferInfo, Dequeued, DeviceCaps, Driver, Region},
    format::{FrameFormat, PixelEncoding},
};

/// 失敗を注入するステップ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    QueryCaps,
    SetFormat,
    RequestBuffers,
    QueryBuffer(u32),
    Map(u32),
    Queue(u32),
    StreamOn,
    StreamOff,
}

pub(crate) struct FakeState {
    pub caps: DeviceCaps,
    /// 先頭がデバイスのデフォルト
    pub supported: Vec<PixelEncoding>,
    pub max_size: (u32, u32),
    /// 非圧縮フォーマットの行末に付けるパディングのバイト数
    pub line_padding: u32,
    /// REQBUFSで許可する最大数
    pub grant: u32,
    pub buffer_len: usize,
    pub fail: Option<Step>,
    /// ストリーミング中に順に書き込まれるフレーム
    pub frames: VecDeque<Vec<u8>>,
    /// readinessの後にDQBUFが返すエラー
    pub dequeue_errors: VecDeque<io::ErrorKind>,
    /// pollが返すエラー。DQBUFより先に使われる
    pub wait_errors: VecDeque<io::ErrorKind>,
    /// pollがエラーを返すときに停止を要求する。シグナルでpollが起こされた状況を再現する
    pub cancel_on_wait_error: Option<CancelToken>,

    pub granted: u32,
    pub memory: BTreeMap<u32, Rc<RefCell<Vec<u8>>>>,
    pub mapped: BTreeSet<u32>,
    pub map_calls: Vec<u32>,
    pub unmap_calls: Vec<u32>,
    pub queue_calls: Vec<u32>,
    pub dequeue_calls: Vec<u32>,
    pub incoming: VecDeque<u32>,
    pub outgoing: VecDeque<(u32, u32)>,
    pub streaming: bool,
    pub stream_off_calls: u32,
    pub released: bool,
    pub closed: bool,
    pub sequence: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            caps: DeviceCaps {
                driver: "fake".to_string(),
                card: "Fake Camera".to_string(),
                bus: "platform:fake".to_string(),
                video_capture: true,
                streaming: true,
            },
            supported: vec![PixelEncoding::Mjpeg, PixelEncoding::Yuyv],
            max_size: (1920, 1080),
            line_padding: 0,
            grant: 4,
            buffer_len: 4096,
            fail: None,
            frames: VecDeque::new(),
            dequeue_errors: VecDeque::new(),
            wait_errors: VecDeque::new(),
            cancel_on_wait_error: None,
            granted: 0,
            memory: BTreeMap::new(),
            mapped: BTreeSet::new(),
            map_calls: vec![],
            unmap_calls: vec![],
            queue_calls: vec![],
            dequeue_calls: vec![],
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            streaming: false,
            stream_off_calls: 0,
            released: false,
            closed: false,
            sequence: 0,
        }
    }
}

impl FakeState {
    fn check(&self, step: Step) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        if self.fail == Some(step) {
            return Err(io::Error::other(format!("injected failure at {step:?}")));
        }
        Ok(())
    }

    // キュー済みのバッファに待機中のフレームを書き込む
    fn fill(&mut self) {
        while self.streaming && !self.frames.is_empty() {
            let Some(index) = self.incoming.pop_front() else {
                break;
            };
            let Some(frame) = self.frames.pop_front() else {
                break;
            };
            let mut mem = self.memory[&index].borrow_mut();
            let len = frame.len().min(mem.len());
            mem[..len].copy_from_slice(&frame[..len]);
            drop(mem);
            self.outgoing.push_back((index, len as u32));
        }
    }

    /// ドライバ側にあるバッファ数
    pub fn with_device(&self) -> usize {
        self.incoming.len() + self.outgoing.len()
    }

    pub fn push_frames(&mut self, count: usize, len: usize) {
        for i in 0..count {
            self.frames.push_back(vec![(i % 251) as u8 + 1; len]);
        }
    }
}

#[derive(Debug)]
pub(crate) struct FakeRegion {
    index: u32,
    mem: Rc<RefCell<Vec<u8>>>,
}

impl Region for FakeRegion {
    fn capacity(&self) -> usize {
        self.mem.borrow().len()
    }

    fn copy_out(&self, len: usize) -> Vec<u8> {
        let mem = self.mem.borrow();
        mem[..len.min(mem.len())].to_vec()
    }
}

pub(crate) struct FakeDriver {
    state: Rc<RefCell<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> (Self, Rc<RefCell<FakeState>>) {
        Self::with_state(FakeState::default())
    }

    pub fn with_state(state: FakeState) -> (Self, Rc<RefCell<FakeState>>) {
        let state = Rc::new(RefCell::new(state));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl Driver for FakeDriver {
    type Region = FakeRegion;

    fn query_caps(&mut self) -> io::Result<DeviceCaps> {
        let s = self.state.borrow();
        s.check(Step::QueryCaps)?;
        Ok(s.caps.clone())
    }

    fn set_format(&mut self, request: &FrameFormat) -> io::Result<FrameFormat> {
        let s = self.state.borrow();
        s.check(Step::SetFormat)?;
        let encoding = if s.supported.contains(&request.encoding) {
            request.encoding
        } else {
            s.supported[0]
        };
        let format = FrameFormat::new(
            encoding,
            request.width.min(s.max_size.0),
            request.height.min(s.max_size.1),
        );
        Ok(format.with_stride(format.stride + s.line_padding))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut s = self.state.borrow_mut();
        s.check(Step::RequestBuffers)?;
        if count == 0 {
            if s.streaming {
                return Err(io::Error::new(io::ErrorKind::ResourceBusy, "streaming"));
            }
            s.granted = 0;
            s.incoming.clear();
            s.outgoing.clear();
            s.released = true;
            return Ok(0);
        }
        s.granted = count.min(s.grant);
        Ok(s.granted)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let s = self.state.borrow();
        s.check(Step::QueryBuffer(index))?;
        if index >= s.granted {
            return Err(invalid("no such buffer"));
        }
        Ok(BufferInfo {
            index,
            length: s.buffer_len as u32,
            offset: index * s.buffer_len as u32,
        })
    }

    fn map(&mut self, info: &BufferInfo) -> io::Result<FakeRegion> {
        let mut s = self.state.borrow_mut();
        s.check(Step::Map(info.index))?;
        if !s.mapped.insert(info.index) {
            return Err(invalid("already mapped"));
        }
        s.map_calls.push(info.index);
        let mem = Rc::new(RefCell::new(vec![0u8; info.length as usize]));
        s.memory.insert(info.index, mem.clone());
        Ok(FakeRegion {
            index: info.index,
            mem,
        })
    }

    fn unmap(&mut self, region: FakeRegion) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        s.unmap_calls.push(region.index);
        if !s.mapped.remove(&region.index) {
            return Err(invalid("not mapped"));
        }
        Ok(())
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        s.check(Step::Queue(index))?;
        if index >= s.granted {
            return Err(invalid("no such buffer"));
        }
        if s.incoming.contains(&index) || s.outgoing.iter().any(|(i, _)| *i == index) {
            return Err(invalid("already queued"));
        }
        s.queue_calls.push(index);
        s.incoming.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let mut s = self.state.borrow_mut();
        if let Some(kind) = s.dequeue_errors.pop_front() {
            return Err(io::Error::new(kind, "injected dequeue error"));
        }
        if !s.streaming {
            return Err(invalid("not streaming"));
        }
        s.fill();
        let (index, bytesused) = s
            .outgoing
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        s.dequeue_calls.push(index);
        s.sequence += 1;
        Ok(Dequeued {
            index,
            bytesused,
            sequence: s.sequence,
        })
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        {
            let mut s = self.state.borrow_mut();
            if s.closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if let Some(kind) = s.wait_errors.pop_front() {
                if let Some(token) = &s.cancel_on_wait_error {
                    token.cancel();
                }
                return Err(io::Error::new(kind, "injected poll error"));
            }
            if !s.dequeue_errors.is_empty() {
                return Ok(true);
            }
            s.fill();
            if !s.outgoing.is_empty() {
                return Ok(true);
            }
        }
        std::thread::sleep(timeout);
        Ok(false)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        s.check(Step::StreamOn)?;
        if s.granted == 0 {
            return Err(invalid("no buffers"));
        }
        s.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        s.stream_off_calls += 1;
        s.check(Step::StreamOff)?;
        s.streaming = false;
        s.incoming.clear();
        s.outgoing.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}
