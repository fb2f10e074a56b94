#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the key length the payload is read against.
    let origin = 40 + data[0] as usize;
    let payload = &data[1..];

    if let Ok(tree) = ntk_root::objects::read_ttree(payload, origin) {
        for b in &tree.branches {
            let _ = b.basket_range(b.n_baskets);
        }
    }
    let _ = ntk_root::basket::read_record(payload, 0);
});
