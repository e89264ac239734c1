//! V4L2デバイスへの実際のアクセス
//!
//! フォーマットやcapabilityは`v4l`の高レベルAPIを使い、
//! バッファの要求とキューイングは`v4l::v4l2`のioctlを直接呼ぶ。
//! `MmapStream`はバッファを内部に隠してしまうので所有権を追跡できないため

use std::{
    io,
    mem,
    os::raw::{c_int, c_void},
    path::Path,
    ptr::{self, NonNull},
    time::Duration,
};

use v4l::{
    buffer::Type, capability::Flags, memory::Memory, v4l2, v4l_sys, video::Capture, Format, FourCC,
};

use crate::{
    driver::{BufferInfo, Dequeued, DeviceCaps, Driver, Region},
    format::{FrameFormat, PixelEncoding},
};

/// mmapした領域
///
/// 解除は[`Driver::unmap`]経由でのみ行う
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl Region for MmapRegion {
    fn capacity(&self) -> usize {
        self.len
    }

    fn copy_out(&self, len: usize) -> Vec<u8> {
        let len = len.min(self.len);
        // SAFETY: ptrはlenバイトのマップ済み領域を指し、unmapされるまで有効
        let src = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), len) };
        src.to_vec()
    }
}

/// `/dev/videoN`に対するドライバ実装
pub struct V4l2Driver {
    device: Option<v4l::Device>,
}

impl V4l2Driver {
    /// デバイスを読み書き・ノンブロッキングで開く
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let device = v4l::Device::with_path(path).inspect_err(|e| {
            tracing::error!("Failed to open device: {:?}", e);
        })?;
        Ok(Self {
            device: Some(device),
        })
    }

    fn device(&self) -> io::Result<&v4l::Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device is closed"))
    }

    fn fd(&self) -> io::Result<c_int> {
        Ok(self.device()?.handle().fd())
    }

    // MMAP方式のキャプチャバッファ記述子
    fn buffer(index: u32) -> v4l_sys::v4l2_buffer {
        // SAFETY: C構造体なので0埋めが初期値として有効
        let mut buf: v4l_sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf.index = index;
        buf
    }
}

impl Driver for V4l2Driver {
    type Region = MmapRegion;

    fn query_caps(&mut self) -> io::Result<DeviceCaps> {
        let caps = self.device()?.query_caps().inspect_err(|e| {
            tracing::error!("Failed to query capabilities: {:?}", e);
        })?;
        Ok(DeviceCaps {
            video_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(Flags::STREAMING),
            driver: caps.driver,
            card: caps.card,
            bus: caps.bus,
        })
    }

    fn set_format(&mut self, request: &FrameFormat) -> io::Result<FrameFormat> {
        let dev = self.device()?;
        let format = Format::new(
            request.width,
            request.height,
            FourCC::new(&request.encoding.fourcc()),
        );
        dev.set_format(&format).inspect_err(|e| {
            tracing::error!("Failed to set format: {:?}", e);
        })?;
        // ドライバが値を丸めることがあるので必ず読み直す
        let actual = dev.format().inspect_err(|e| {
            tracing::error!("Failed to get format: {:?}", e);
        })?;
        let encoding = PixelEncoding::from_fourcc(actual.fourcc.repr);
        let negotiated = FrameFormat::new(encoding, actual.width, actual.height);
        Ok(negotiated.with_stride(actual.stride))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let fd = self.fd()?;
        // SAFETY: C構造体なので0埋めが初期値として有効
        let mut req: v4l_sys::v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut req as *mut _ as *mut c_void,
            )?;
        }
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let fd = self.fd()?;
        let mut buf = Self::buffer(index);
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut buf as *mut _ as *mut c_void,
            )?;
        }
        Ok(BufferInfo {
            index,
            length: buf.length,
            // SAFETY: MMAP方式ではoffsetが有効なメンバ
            offset: unsafe { buf.m.offset },
        })
    }

    fn map(&mut self, info: &BufferInfo) -> io::Result<MmapRegion> {
        let fd = self.fd()?;
        let len = info.length as usize;
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                info.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(MmapRegion { ptr, len })
    }

    fn unmap(&mut self, region: MmapRegion) -> io::Result<()> {
        let ret = unsafe { libc::munmap(region.ptr.as_ptr().cast::<c_void>(), region.len) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let fd = self.fd()?;
        let mut buf = Self::buffer(index);
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_QBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let fd = self.fd()?;
        let mut buf = Self::buffer(0);
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut buf as *mut _ as *mut c_void,
            )?;
        }
        Ok(Dequeued {
            index: buf.index,
            bytesused: buf.bytesused,
            sequence: buf.sequence,
        })
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let fd = self.fd()?;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // 端数はタイムアウトより早く戻らないよう切り上げる
        let millis = timeout.as_micros().div_ceil(1000).min(c_int::MAX as u128) as c_int;
        let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
        match ret {
            r if r < 0 => Err(io::Error::last_os_error()),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut typ = Type::VideoCapture as u32;
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut c_void,
            )
        }
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut typ = Type::VideoCapture as u32;
        unsafe {
            v4l2::ioctl(
                fd,
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut typ as *mut _ as *mut c_void,
            )
        }
    }

    fn close(&mut self) {
        // Deviceのdropでfdが閉じられる
        if self.device.take().is_some() {
            tracing::debug!("device handle closed");
        }
    }
}
