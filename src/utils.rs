use std::time::{SystemTime, UNIX_EPOCH};

use crc::{Crc, CRC_32_ISCSI};

/// CRC32-C, the checksum record batches carry from magic 2 onwards.
pub static CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const CRC32C_POLYNOMIAL_REVERSED: u32 = 0x82F6_3B78;

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

pub fn to_crc32c(data: &[u8]) -> u32 {
    CRC32C.checksum(data)
}

/// Combines `crc1` over some bytes A with `crc2` over bytes B of length
/// `len2` into the checksum of A followed by B, without touching A or B.
pub fn combine_crc32c(mut crc1: u32, crc2: u32, mut len2: usize) -> u32 {
    if len2 == 0 {
        return crc1;
    }

    let mut even = [0u32; 32];
    let mut odd = [0u32; 32];

    // operator for one zero bit
    odd[0] = CRC32C_POLYNOMIAL_REVERSED;
    let mut row = 1u32;
    for entry in odd.iter_mut().skip(1) {
        *entry = row;
        row <<= 1;
    }

    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    // apply len2 zero bytes to crc1, first square puts the operator for one
    // zero byte (eight zero bits) in even
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0;
    let mut index = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[index];
        }
        vec >>= 1;
        index += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for (n, entry) in square.iter_mut().enumerate() {
        *entry = gf2_matrix_times(mat, mat[n]);
    }
}
