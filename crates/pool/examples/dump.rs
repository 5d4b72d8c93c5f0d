//! Walk through the pool's lifecycle and print a dump after each step.
//!
//! Run with `cargo run --example dump`.

use blockpool::prelude::*;

fn report<P: ArenaProvider>(pool: &MemoryPool<P>) {
    let mut out = String::new();
    pool.dump_with(&mut out, |payload, _size| {
        format!("i32 = {}", unsafe { payload.cast::<i32>().read() })
    })
    .expect("writing to a String cannot fail");
    println!("{out}");
}

fn main() -> PoolResult<()> {
    let mut pool = MemoryPool::new()?;
    report(&pool);

    println!("-- alloc int");
    let i = pool.alloc_value(100_i32)?;
    assert_eq!(unsafe { i.read() }, 100);
    report(&pool);

    println!("-- release int (twice)");
    pool.release(i)?;
    assert_eq!(pool.release(i), Err(PoolError::InvalidPointer));
    report(&pool);

    Ok(())
}
