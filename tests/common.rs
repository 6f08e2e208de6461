use commitlog::{Buffer, Reader};

/// Runs a full forward scan of `buf` via [`Reader::seek`]/[`Reader::next`],
/// collecting `(index, op_type)` pairs in encounter order.
pub fn scan_index_and_op(buf: &mut Buffer) -> Vec<(u32, u8)> {
    let mut reader = Reader::seek(buf);
    let mut out = Vec::new();
    while reader.next() {
        out.push((reader.index(), reader.op_type()));
    }
    out
}
