//! In-memory content objects.
use crate::common::CIPHER_BLOCK_SIZE;
use crate::errors::Error;
use crate::traits::ContentObject;
use rand_core::RngCore;

/// [`ContentObject`] backed by a list of in-memory blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBuffer {
    blocks: Vec<Vec<u8>>,
}

impl ContentBuffer {
    /// Wrap already-split blocks.
    ///
    /// # Errors
    /// `InvalidBlockLength` if a block is empty or not a multiple of the cipher block size.
    pub fn new(blocks: Vec<Vec<u8>>) -> Result<Self, Error> {
        if let Some(bad) = blocks
            .iter()
            .find(|b| b.is_empty() || b.len() % CIPHER_BLOCK_SIZE != 0)
        {
            return Err(Error::InvalidBlockLength(bad.len()));
        }
        Ok(ContentBuffer { blocks })
    }

    /// `block_qty` blocks of `block_size` random bytes each.
    pub fn random<R: RngCore>(block_qty: usize, block_size: usize, rng: &mut R) -> Self {
        let blocks = (0..block_qty)
            .map(|_| {
                let mut block = vec![0u8; block_size];
                rng.fill_bytes(&mut block);
                block
            })
            .collect();
        ContentBuffer { blocks }
    }

    /// Split `data` into blocks of `block_size` bytes. The last block holds whatever remains,
    /// zero-padded up to the next cipher block boundary.
    ///
    /// # Errors
    /// `block_size` must be a non-zero multiple of the cipher block size.
    pub fn from_bytes(data: &[u8], block_size: usize) -> Result<Self, Error> {
        if block_size == 0 || block_size % CIPHER_BLOCK_SIZE != 0 {
            return Err(Error::InvalidBlockLength(block_size));
        }
        let blocks = data
            .chunks(block_size)
            .map(|chunk| {
                let mut block = chunk.to_vec();
                let padded = (block.len() + CIPHER_BLOCK_SIZE - 1) / CIPHER_BLOCK_SIZE;
                block.resize(padded * CIPHER_BLOCK_SIZE, 0);
                block
            })
            .collect();
        Ok(ContentBuffer { blocks })
    }

    fn block(&self, block_idx: u64) -> Result<&[u8], Error> {
        usize::try_from(block_idx)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .map(Vec::as_slice)
            .ok_or(Error::BlockNotFound(block_idx))
    }
}

impl ContentObject for ContentBuffer {
    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_size(&self, block_idx: u64) -> Result<usize, Error> {
        self.block(block_idx).map(<[u8]>::len)
    }

    fn get_block(&self, block_idx: u64) -> Result<&[u8], Error> {
        self.block(block_idx)
    }

    fn get_cipher_block(&self, block_idx: u64, cipher_block_idx: u32) -> Result<&[u8], Error> {
        let block = self.block(block_idx)?;
        let qty = block.len() / CIPHER_BLOCK_SIZE;
        if qty == 0 {
            return Err(Error::InvalidBlockLength(block.len()));
        }
        let i = cipher_block_idx as usize % qty;
        Ok(&block[i * CIPHER_BLOCK_SIZE..(i + 1) * CIPHER_BLOCK_SIZE])
    }
}
