use std::fmt::{Debug, Display, Formatter};

use crate::protocol_types::traits::{ReadProt, SizedProt, WriteProt};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SEGMENT_BITS: u8 = 0x7f;
const CONTINUE_BIT: u8 = 0x80;
const MAX_VARINT_BYTES: usize = 5;
const MAX_STRING_BYTES: u32 = 32767 * 4 + 3;

#[derive(Ord, PartialOrd, Eq, PartialEq, Clone, Copy)]
pub(crate) struct VarInt {
    pub(crate) value: i32,
}

impl VarInt {
    /// Appends the varint encoding to `buf`.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        let mut x = self.value as u32;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }
            buf.push(temp);
            if x == 0 {
                break;
            }
        }
    }

    /// Decodes a varint from the front of `bytes`. `Ok(None)` means more bytes are needed.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>, String> {
        let mut value: i32 = 0;
        for (i, current_byte) in bytes.iter().enumerate().take(MAX_VARINT_BYTES) {
            value |= ((current_byte & SEGMENT_BITS) as i32) << (7 * i);
            if current_byte & CONTINUE_BIT == 0 {
                return Ok(Some((Self { value }, i + 1)));
            }
        }
        if bytes.len() >= MAX_VARINT_BYTES {
            return Err("VarInt is too big".into());
        }
        Ok(None)
    }
}

impl From<usize> for VarInt {
    fn from(value: usize) -> Self {
        Self {
            value: value as i32,
        }
    }
}

impl From<i32> for VarInt {
    fn from(value: i32) -> Self {
        Self { value }
    }
}

impl Display for VarInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Debug for VarInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[async_trait]
impl ReadProt for VarInt {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
        let mut bytes = Vec::with_capacity(MAX_VARINT_BYTES);
        loop {
            bytes.push(stream.read_u8().await.map_err(io_error)?);
            if let Some((value, _)) = Self::decode(&bytes)? {
                return Ok(value);
            }
        }
    }
}

impl SizedProt for VarInt {
    fn prot_size(&self) -> usize {
        let bits = 32 - (self.value as u32).leading_zeros() as usize;
        bits.max(1).div_ceil(7)
    }
}

#[async_trait]
impl WriteProt for VarInt {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        let mut buf = Vec::with_capacity(MAX_VARINT_BYTES);
        self.encode(&mut buf);
        stream.write_all(&buf).await.map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> String {
    format!("IO error: {e}")
}

#[async_trait]
impl ReadProt for String {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let len = VarInt::read(stream).await?.value;
        let len = u32::try_from(len).map_err(|_| format!("Negative string length: {len}"))?;
        if len > MAX_STRING_BYTES {
            return Err(format!("String too long: {len} B"));
        }
        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await.map_err(io_error)?;
        String::from_utf8(buf).map_err(|e| format!("UTF8 error: {e}"))
    }
}

#[async_trait]
impl WriteProt for String {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        VarInt::from(self.len()).write(stream).await?;
        stream.write_all(self.as_bytes()).await.map_err(io_error)
    }
}

impl SizedProt for String {
    fn prot_size(&self) -> usize {
        VarInt::from(self.len()).prot_size() + self.len()
    }
}

/// Fixed width numbers travel big endian.
macro_rules! big_endian {
    ($($ty:ty => $read:ident, $write:ident;)*) => {
        $(
            #[async_trait]
            impl ReadProt for $ty {
                async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String> {
                    stream.$read().await.map_err(io_error)
                }
            }

            #[async_trait]
            impl WriteProt for $ty {
                async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
                    stream.$write(*self).await.map_err(io_error)
                }
            }

            impl SizedProt for $ty {
                fn prot_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

big_endian! {
    u8 => read_u8, write_u8;
    u16 => read_u16, write_u16;
    i64 => read_i64, write_i64;
    u64 => read_u64, write_u64;
    f32 => read_f32, write_f32;
    f64 => read_f64, write_f64;
}

#[async_trait]
impl ReadProt for bool {
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        match u8::read(stream).await? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(format!("Invalid boolean byte: {other:#04x}")),
        }
    }
}

#[async_trait]
impl WriteProt for bool {
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        u8::from(*self).write(stream).await
    }
}

impl SizedProt for bool {
    fn prot_size(&self) -> usize {
        1
    }
}

/// A varint-count-prefixed sequence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SizedVec<T>
where
    T: Send + Sync,
{
    pub(crate) vec: Vec<T>,
}

impl<T> From<Vec<T>> for SizedVec<T>
where
    T: Send + Sync,
{
    fn from(value: Vec<T>) -> Self {
        Self { vec: value }
    }
}

#[async_trait]
impl<T> WriteProt for SizedVec<T>
where
    T: WriteProt + Sync + Send,
{
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        VarInt::from(self.vec.len()).write(stream).await?;
        for item in &self.vec {
            item.write(stream).await?;
        }
        Ok(())
    }
}

// The element count is announced as a VarInt just before the elements.
#[async_trait]
impl<T> ReadProt for SizedVec<T>
where
    T: ReadProt + Sync + Send,
{
    async fn read(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, String>
    where
        Self: Sized,
    {
        let len = VarInt::read(stream).await?;
        if len.value < 0 {
            return Err(format!("Negative array length: {}", len.value));
        }
        let len = len.value as usize;
        let mut buf = Vec::with_capacity(len.min(256));
        for _ in 0..len {
            buf.push(T::read(stream).await?);
        }
        Ok(Self { vec: buf })
    }
}

impl<T> SizedProt for SizedVec<T>
where
    T: SizedProt + Send + Sync,
{
    fn prot_size(&self) -> usize {
        VarInt::from(self.vec.len()).prot_size()
            + self.vec.iter().map(|x| x.prot_size()).sum::<usize>()
    }
}

impl<T> SizedProt for Option<T>
where
    T: SizedProt,
{
    fn prot_size(&self) -> usize {
        match self {
            Some(x) => x.prot_size(),
            None => 0,
        }
    }
}

#[async_trait]
impl<T> WriteProt for Option<T>
where
    T: WriteProt + Sync,
{
    async fn write(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<(), String> {
        if let Some(x) = self {
            x.write(stream).await?;
        }
        Ok(())
    }
}
