use std::cell::RefCell;
use std::io;

use nvme_passthru::{
    Disk, ErrorKind, IoctlCode, IoctlDevice, SECTOR_SIZE, ScsiData, ScsiRequest, SectorFile,
};

/// Records every OS transfer and fails any that an unbuffered handle would
/// reject.
#[derive(Default)]
struct UnbufferedFile {
    writes: Vec<(usize, usize)>,
    reads: Vec<usize>,
    media: Vec<u8>,
    size: u64,
    geometry: u64,
    cdbs: RefCell<Vec<Vec<u8>>>,
}

fn check_aligned(addr: usize, len: usize) -> io::Result<()> {
    if addr % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
        return Err(io::Error::from_raw_os_error(87));
    }
    Ok(())
}

impl SectorFile for UnbufferedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        check_aligned(buf.as_ptr() as usize, buf.len())?;
        self.reads.push(buf.len());
        let n = buf.len().min(self.media.len());
        buf[..n].copy_from_slice(&self.media[..n]);
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        check_aligned(buf.as_ptr() as usize, buf.len())?;
        self.writes.push((buf.len(), buf.as_ptr() as usize % SECTOR_SIZE));
        self.media = buf.to_vec();
        Ok(buf.len())
    }

    fn file_size(&self) -> io::Result<u64> {
        Ok(self.size)
    }
}

impl IoctlDevice for UnbufferedFile {
    fn ioctl(&self, code: IoctlCode, _input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        match code {
            IoctlCode::GetDriveGeometryEx => {
                output[..40].fill(0);
                output[24..32].copy_from_slice(&self.geometry.to_le_bytes());
                Ok(40)
            }
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    fn scsi_pass_through(&self, request: &mut ScsiRequest<'_>) -> io::Result<()> {
        self.cdbs.borrow_mut().push(request.cdb().to_vec());
        if let ScsiData::In(buf) = &mut request.data {
            buf.fill(0xA5);
        }
        request.transferred = request.data.len() as u32;
        Ok(())
    }
}

#[test]
fn short_write_goes_out_as_one_aligned_sector() {
    let mut disk = Disk::new(UnbufferedFile::default());
    let data = vec![0x5Au8; 500];
    assert_eq!(disk.write_sectors(&data).unwrap(), 500);

    let file = disk.device();
    assert_eq!(file.writes, vec![(512, 0)]);
    assert_eq!(&file.media[..500], &data[..]);
    assert!(file.media[500..].iter().all(|&b| b == 0));
}

#[test]
fn short_read_copies_only_what_was_asked() {
    let mut file = UnbufferedFile::default();
    file.media = (0..1024).map(|i| i as u8).collect();
    let mut disk = Disk::new(file);

    let mut buf = vec![0u8; 700];
    assert_eq!(disk.read_sectors(&mut buf).unwrap(), 700);
    assert_eq!(disk.device().reads, vec![1024]);
    assert_eq!(buf[699], (699 % 256) as u8);
}

#[test]
fn empty_transfers_skip_the_os() {
    let mut disk = Disk::new(UnbufferedFile::default());
    assert_eq!(disk.write_sectors(&[]).unwrap(), 0);
    assert_eq!(disk.read_sectors(&mut []).unwrap(), 0);
    assert!(disk.device().writes.is_empty());
    assert!(disk.device().reads.is_empty());
}

#[test]
fn size_falls_back_to_geometry() {
    let file = UnbufferedFile {
        size: 0,
        geometry: 512 * 1_000_215_216,
        ..Default::default()
    };
    assert_eq!(Disk::new(file).size().unwrap(), 512 * 1_000_215_216);

    let file = UnbufferedFile {
        size: 4096,
        ..Default::default()
    };
    assert_eq!(Disk::new(file).size().unwrap(), 4096);
}

#[test]
fn scsi_write_advances_and_encodes_fua() {
    let mut disk = Disk::new(UnbufferedFile::default()).with_fua(true);
    disk.seek_write(4096);
    assert_eq!(disk.scsi_write(&[0u8; 1024]).unwrap(), 1024);
    assert_eq!(disk.write_offset(), 5120);

    let cdbs = disk.device().cdbs.borrow().clone();
    let cdb = &cdbs[0];
    assert_eq!(cdb.len(), 16);
    assert_eq!(cdb[0], 0x8A);
    assert_eq!(cdb[1], 0x08);
    assert_eq!(u64::from_be_bytes(cdb[2..10].try_into().unwrap()), 8);
    assert_eq!(u32::from_be_bytes(cdb[10..14].try_into().unwrap()), 2);
}

#[test]
fn scsi_read_needs_whole_blocks() {
    let mut disk = Disk::new(UnbufferedFile::default());
    let mut buf = vec![0u8; 500];
    let err = disk.scsi_read(0, &mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut buf = vec![0u8; 512];
    assert_eq!(disk.scsi_read(1024, &mut buf).unwrap(), 512);
    assert!(buf.iter().all(|&b| b == 0xA5));
    let cdbs = disk.device().cdbs.borrow().clone();
    assert_eq!(cdbs.len(), 1);
    assert_eq!(cdbs[0][0], 0x88);
    assert_eq!(u64::from_be_bytes(cdbs[0][2..10].try_into().unwrap()), 2);
}
