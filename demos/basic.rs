//! Drives the process-wide allocator through a few allocations and prints
//! where each block lands. The fit strategy can be given as first argument
//! (`best`, `worst`, `first` or `next`), set `RUST_LOG=debug` to see splits
//! and merges.

use std::{env, process, ptr::NonNull};

use umem::Strategy;

fn log_alloc(size: usize, addr: Option<NonNull<u8>>) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    pretty_env_logger::init();

    let strategy = match env::args().nth(1).map(|arg| arg.parse::<Strategy>()) {
        None => Strategy::default(),
        Some(Ok(strategy)) => strategy,
        Some(Err(err)) => {
            eprintln!("Error: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = umem::init(64 * 1024, strategy) {
        eprintln!("Error: failed to initialize memory allocator: {err}");
        process::exit(1);
    }
    println!("Initialized 64 KiB region using {strategy}");

    let sizes = [1000, 2000, 500, 1500];
    let blocks: Vec<_> = sizes
        .iter()
        .map(|&size| {
            let addr = umem::alloc(size);
            log_alloc(size, addr);
            addr
        })
        .collect();

    println!("Freeing the {} and {} byte blocks", sizes[1], sizes[3]);
    umem::free(blocks[1]);
    umem::free(blocks[3]);

    let addr = umem::alloc(1200);
    log_alloc(1200, addr);

    let addr = umem::realloc(addr, 3000);
    println!("Grew it to 3000 bytes, now at {addr:?}");

    if let Ok(stats) = umem::stats() {
        println!("{stats}");
    }
}
