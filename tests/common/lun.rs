use usbd_storage::lun::{Lun, LunError, LunPermissions, LunState, BLOCK_SIZE};

/// In-memory [Lun] double for exercising [Scsi] against real data-plane behavior.
///
/// [Scsi]: usbd_storage::subclass::scsi::Scsi
pub struct MemLun {
    state: LunState,
    writable: bool,
    capacity_blocks: u32,
    permissions: LunPermissions,
    data: Vec<u8>,
    fail_write: Option<LunError>,
    fail_read: Option<LunError>,
    writes_seen: Vec<(u32, Vec<u8>)>,
}

impl MemLun {
    pub fn new(capacity_blocks: u32) -> Self {
        Self {
            state: LunState::Ready,
            writable: true,
            capacity_blocks,
            permissions: LunPermissions::empty(),
            data: vec![0u8; capacity_blocks as usize * BLOCK_SIZE as usize],
            fail_write: None,
            fail_read: None,
            writes_seen: vec![],
        }
    }

    pub fn not_ready(mut self) -> Self {
        self.state = LunState::NotPresent;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn with_permissions(mut self, permissions: LunPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn failing_writes_with(mut self, err: LunError) -> Self {
        self.fail_write = Some(err);
        self
    }

    pub fn failing_reads_with(mut self, err: LunError) -> Self {
        self.fail_read = Some(err);
        self
    }

    pub fn seed_block(mut self, lba: u32, bytes: &[u8]) -> Self {
        let start = lba as usize * BLOCK_SIZE as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self
    }

    #[allow(dead_code)]
    pub fn block(&self, lba: u32) -> &[u8] {
        let start = lba as usize * BLOCK_SIZE as usize;
        &self.data[start..start + BLOCK_SIZE as usize]
    }

    #[allow(dead_code)]
    pub fn writes_seen(&self) -> &[(u32, Vec<u8>)] {
        &self.writes_seen
    }
}

impl Lun for MemLun {
    fn state(&self) -> LunState {
        self.state
    }

    fn capacity_blocks(&self) -> u32 {
        self.capacity_blocks
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn permissions(&self) -> LunPermissions {
        self.permissions
    }

    fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE as usize]) -> Result<(), LunError> {
        if let Some(err) = self.fail_read {
            return Err(err);
        }
        let start = lba as usize * BLOCK_SIZE as usize;
        buf.copy_from_slice(&self.data[start..start + BLOCK_SIZE as usize]);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, buf: &[u8; BLOCK_SIZE as usize]) -> Result<(), LunError> {
        if let Some(err) = self.fail_write {
            return Err(err);
        }
        let start = lba as usize * BLOCK_SIZE as usize;
        self.data[start..start + BLOCK_SIZE as usize].copy_from_slice(buf);
        self.writes_seen.push((lba, buf.to_vec()));
        Ok(())
    }

    fn read_buffer(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), LunError> {
        if !self.permissions.contains(LunPermissions::BUFFER_RAM) {
            return Err(LunError::NotPermitted);
        }
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_buffer(&mut self, offset: u32, buf: &[u8]) -> Result<(), LunError> {
        if !self.permissions.contains(LunPermissions::BUFFER_RAM) {
            return Err(LunError::NotPermitted);
        }
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn vendor_command(&mut self, cdb: &[u8]) -> Option<Result<(), LunError>> {
        if !self.permissions.contains(LunPermissions::VENDOR_COMMAND) {
            return None;
        }
        if cdb[1] == 0xFF {
            Some(Err(LunError::NotPermitted))
        } else {
            Some(Ok(()))
        }
    }
}
