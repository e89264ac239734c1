//! デバイスと共有するバッファの管理
//!
//! バッファは常にデバイスかアプリケーションのどちらか一方だけが所有する。
//! キュー/デキューは所有権の移動として表現し、アプリケーションが読めるのは
//! `WithApplication`の間だけ

use std::io;

use crate::{
    driver::{Driver, Region},
    error::{Error, Result},
};

/// ダブルバッファリングに必要な最小バッファ数
pub const MIN_BUFFERS: u32 = 2;

/// バッファの所有者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// ドライバのキューにあり、アプリケーションは触れない
    WithDevice,
    WithApplication,
}

/// マップ済みの1バッファ
#[derive(Debug)]
pub struct Buffer<R> {
    index: u32,
    region: R,
    ownership: Ownership,
}

impl<R: Region> Buffer<R> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// 先頭から`used`バイトをコピーして返す
    ///
    /// デバイスが所有している間は`None`
    pub fn read(&self, used: usize) -> Option<Vec<u8>> {
        match self.ownership {
            Ownership::WithApplication => Some(self.region.copy_out(used)),
            Ownership::WithDevice => None,
        }
    }
}

/// 固定数のバッファを持つプール
///
/// インデックスはデバイスが割り当てた番号と一致し、プールの生存中は変わらない
#[derive(Debug)]
pub struct BufferPool<R> {
    buffers: Vec<Buffer<R>>,
}

impl<R: Region> BufferPool<R> {
    /// バッファを要求し、全てをマップしてデバイスに渡す
    ///
    /// 途中で失敗した場合はそれまでにマップした領域を全て解除してからエラーを返す
    pub fn create<D>(driver: &mut D, count_hint: u32) -> Result<Self>
    where
        D: Driver<Region = R>,
    {
        if count_hint < MIN_BUFFERS {
            return Err(Error::InsufficientBuffers {
                granted: count_hint,
                required: MIN_BUFFERS,
            });
        }
        let granted = driver
            .request_buffers(count_hint)
            .map_err(|e| Error::mapping("request", 0, e))?;
        if granted < MIN_BUFFERS {
            // 割り当て済みのものがあれば返却しておく
            if granted > 0 {
                if let Err(e) = driver.request_buffers(0) {
                    tracing::warn!("Failed to release buffers: {:?}", e);
                }
            }
            return Err(Error::InsufficientBuffers {
                granted,
                required: MIN_BUFFERS,
            });
        }
        if granted != count_hint {
            tracing::info!("device granted {granted} of {count_hint} requested buffers");
        }

        let mut pool = Self {
            buffers: Vec::with_capacity(granted as usize),
        };
        if let Err(e) = pool.map_all(driver, granted) {
            pool.release(driver);
            if let Err(e) = driver.request_buffers(0) {
                tracing::warn!("Failed to release buffers: {:?}", e);
            }
            return Err(e);
        }
        Ok(pool)
    }

    fn map_all<D>(&mut self, driver: &mut D, granted: u32) -> Result<()>
    where
        D: Driver<Region = R>,
    {
        for index in 0..granted {
            let info = driver
                .query_buffer(index)
                .map_err(|e| Error::mapping("query", index, e))?;
            let region = driver
                .map(&info)
                .map_err(|e| Error::mapping("map", index, e))?;
            tracing::debug!(
                "mapped buffer {index}: {} bytes at offset {:#x}",
                info.length,
                info.offset
            );
            self.buffers.push(Buffer {
                index,
                region,
                ownership: Ownership::WithApplication,
            });
        }
        for index in 0..granted {
            self.enqueue(driver, index)
                .map_err(|e| Error::mapping("queue", index, e))?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Buffer<R>> {
        self.buffers.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer<R>> {
        self.buffers.iter()
    }

    /// 指定した所有者のバッファ数
    pub fn count(&self, ownership: Ownership) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.ownership == ownership)
            .count()
    }

    /// バッファをデバイスに返す
    ///
    /// ドライバが受け付けた場合のみ`WithDevice`に遷移する
    pub fn enqueue<D>(&mut self, driver: &mut D, index: u32) -> io::Result<()>
    where
        D: Driver<Region = R>,
    {
        let buffer = self.slot(index)?;
        if buffer.ownership != Ownership::WithApplication {
            return Err(io::Error::other(format!(
                "buffer {index} is already owned by the device"
            )));
        }
        driver.queue(index)?;
        buffer.ownership = Ownership::WithDevice;
        Ok(())
    }

    /// デキューされたバッファをアプリケーションの所有にする
    pub fn take_from_device(&mut self, index: u32) -> io::Result<&Buffer<R>> {
        let buffer = self.slot(index)?;
        if buffer.ownership != Ownership::WithDevice {
            return Err(io::Error::other(format!(
                "driver returned buffer {index} which it did not own"
            )));
        }
        buffer.ownership = Ownership::WithApplication;
        Ok(buffer)
    }

    /// ストリームを止めた後、全バッファをアプリケーション側に戻す
    pub(crate) fn reclaim_all(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.ownership = Ownership::WithApplication;
        }
    }

    fn slot(&mut self, index: u32) -> io::Result<&mut Buffer<R>> {
        self.buffers
            .get_mut(index as usize)
            .ok_or_else(|| io::Error::other(format!("buffer index {index} out of range")))
    }

    /// マップ済みの全領域を解除する
    ///
    /// プールを消費するので同じ領域を2回解除することはない。失敗は記録して続行する
    pub fn release<D>(self, driver: &mut D)
    where
        D: Driver<Region = R>,
    {
        for buffer in self.buffers {
            let index = buffer.index;
            if let Err(e) = driver.unmap(buffer.region) {
                tracing::warn!("Failed to unmap buffer {index}: {:?}", e);
            }
        }
    }
}
