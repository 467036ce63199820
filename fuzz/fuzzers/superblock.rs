#![no_main]

use libfuzzer_sys::fuzz_target;
use positioned_io::ReadAt;

struct Bytes<'a>(&'a [u8]);

impl<'a> ReadAt for Bytes<'a> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        if pos >= self.0.len() as u64 {
            return Ok(0);
        }
        let pos = pos as usize;
        let n = buf.len().min(self.0.len() - pos);
        buf[..n].copy_from_slice(&self.0[pos..pos + n]);
        Ok(n)
    }
}

fuzz_target!(|data: &[u8]| {
    // arbitrary bytes must come back as typed errors, never panics
    if let Ok(fs) = xfs::FileSystem::new(Bytes(data)) {
        let _ = fs.root();
        let _ = fs.read_dir("/");
        let _ = fs.stat("etc/os-release");
    }
});
