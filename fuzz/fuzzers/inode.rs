#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = xfs::raw::RawInode::from_slice(data);
    let _ = xfs::raw::RawSuperblock::from_slice(data);
    let _ = xfs::raw::RawAgf::from_slice(data);
    let _ = xfs::raw::RawAgi::from_slice(data);
    let _ = xfs::raw::RawAgfl::from_slice(data);
    let _ = xfs::raw::RawDir3DataHdr::from_slice(data);
    let _ = xfs::raw::RawBtreeLongHdr::from_slice(data);
});
