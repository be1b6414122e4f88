//! Section layout and request mix of a resolved access pattern

use iodrive::access::{AccessPattern, IoDirection, OpKind, SECTOR_SIZE};

const MIB: u64 = 1024 * 1024;

#[test]
fn test_two_section_mix_over_one_mib() {
    let mut pattern = AccessPattern::parse("50:randread:4k,50:randwrite|30:4k")
        .unwrap()
        .with_seed(7);
    pattern.resolve(MIB).unwrap();

    let sections = pattern.sections();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].kind, OpKind::ReadRand);
    assert_eq!(sections[1].kind, OpKind::RwRand);
    assert_eq!(sections[1].read_percent, 30);
    assert_eq!(sections[0].start, 0);
    assert_eq!(sections[1].start, MIB / 2);
    assert_eq!(sections[0].len(), MIB / 2);
    assert_eq!(sections[1].len(), MIB / 2);

    let mut per_section = [0u64; 2];
    let mut writes_in_second = 0u64;
    for _ in 0..10_000 {
        let req = pattern.next_request().unwrap();
        assert_eq!(req.offset % SECTOR_SIZE, 0);
        assert!(req.offset + req.block_size <= MIB);
        per_section[req.section] += 1;

        match req.section {
            0 => {
                assert_eq!(req.direction, IoDirection::Read);
                assert!(req.offset + req.block_size <= MIB / 2);
            }
            _ => {
                assert!(req.offset >= MIB / 2);
                if req.direction == IoDirection::Write {
                    writes_in_second += 1;
                }
            }
        }
    }

    // roughly even split between sections
    assert!((4_500..=5_500).contains(&per_section[0]), "{:?}", per_section);

    let write_share = writes_in_second as f64 / per_section[1] as f64;
    assert!((0.65..=0.75).contains(&write_share), "write share {}", write_share);
}

#[test]
fn test_idle_remainder_generates_no_io() {
    let mut pattern = AccessPattern::parse("25:read:64k").unwrap().with_seed(3);
    pattern.resolve(4 * MIB).unwrap();
    assert_eq!(pattern.percent_sum(), 100);

    let mut idle = 0;
    let mut last_read = None;
    for _ in 0..4_000 {
        let req = pattern.next_request().unwrap();
        match req.direction {
            IoDirection::Idle => idle += 1,
            IoDirection::Read => {
                // sequential cursor advances one block at a time and wraps
                if let Some(prev) = last_read {
                    assert!(req.offset == prev + 65536 || req.offset == 0);
                }
                last_read = Some(req.offset);
            }
            IoDirection::Write => panic!("no write section configured"),
        }
    }
    assert!((2_700..=3_300).contains(&idle), "idle draws {}", idle);
}
