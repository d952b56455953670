//! Property tests for the record codec
//! 记录编解码属性测试

use proptest::prelude::*;
use rbs_codec::{Codec, Rec, SegBuf, Unpack, preimage};

const PAGE: usize = 4096;

/// Page with a data head and optional zero tail
/// 带数据头和可选零尾的页
fn arb_page() -> impl Strategy<Value = Vec<u8>> {
  (
    prop::collection::vec(any::<u8>(), 0..=PAGE),
    any::<bool>(),
    any::<bool>(),
  )
    .prop_map(|(mut head, repeat, full)| {
      if repeat {
        for (i, b) in head.iter_mut().enumerate() {
          *b = (i % 5) as u8;
        }
      }
      if full {
        head.resize(PAGE, 0);
      }
      head
    })
}

fn arb_codec() -> impl Strategy<Value = Codec> {
  prop_oneof![Just(Codec::None), Just(Codec::Lz4), Just(Codec::Zstd)]
}

fn arb_rec() -> impl Strategy<Value = Rec> {
  prop_oneof![
    (0u8..16, 0u32..1000, prop::collection::vec(any::<u8>(), 0..3000)).prop_map(
      |(dbid, pgno, data)| Rec::DbPage {
        dbid,
        pgno,
        flags: 0,
        data
      }
    ),
    (0u8..16, 0u32..1000).prop_map(|(dbid, pgno)| Rec::DbNewPage { dbid, pgno }),
    (0u8..16, "[a-z/]{1,60}").prop_map(|(dbid, name)| Rec::DbAttach { dbid, name }),
  ]
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  /// restore(capture(page)) == page, byte for byte
  /// 逐字节还原
  #[test]
  fn prop_preimage_round_trip(pg in arb_page(), codec in arb_codec()) {
    let (flags, data) = preimage::capture(&pg, PAGE, codec);
    prop_assert_eq!(preimage::restore(&data, flags, PAGE).unwrap(), pg);
  }

  /// Reassembly is independent of segment and buffer size
  /// 重组结果与段大小和缓冲区大小无关
  #[test]
  fn prop_fragment_transparent(
    recs in prop::collection::vec(arb_rec(), 1..20),
    seg_pow in 9u32..13,
    segs in 1usize..6,
  ) {
    let seg = 1usize << seg_pow;
    let mut bin = Vec::new();
    let mut buf = SegBuf::new(1, segs, seg);
    for rec in &recs {
      let enc = rec.encode().unwrap();
      let mut done = 0;
      while done < enc.len() {
        done = buf.put(&enc, done, 1).0;
        if buf.is_full() {
          let next = buf.first() + buf.segs();
          let full = std::mem::replace(&mut buf, SegBuf::new(next, segs, seg));
          bin.extend_from_slice(&full.into_data(segs * seg));
        }
      }
    }
    let valid = buf.seal_tail(1);
    bin.extend_from_slice(buf.bytes(valid));
    prop_assert_eq!(bin.len() % seg, 0);

    let mut r = Unpack::new(seg);
    r.load(1, bin);
    let mut got = Vec::new();
    while let Some((rec, _)) = r.next().unwrap() {
      got.push(rec);
    }
    prop_assert_eq!(got, recs);
  }
}
