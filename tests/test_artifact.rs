use eegw::artifact::{detect_bad_channels, peak_to_peak, reject_epochs};
use eegw::Epoch;
use ndarray::Array2;

fn data() -> Array2<f32> {
    Array2::from_shape_vec(
        (3, 5),
        vec![-2.0, 6.0, -1.0, -4.0, 0.0, 9.0, 3.0, 5.0, 2.0, 1.0, 0.0, -4.0, -8.0, -3.0, 8.0],
    )
    .unwrap()
}

#[test]
fn detect_bad_channels_cases() {
    let cases: [(f32, &[usize]); 5] = [
        (15.0, &[2]),
        (8.0, &[0, 2]),
        (7.9, &[0, 1, 2]),
        (20.0, &[]),
        (-1.0, &[0, 1, 2]),
    ];
    for (criterion, expected) in cases {
        assert_eq!(detect_bad_channels(data().view(), criterion), expected, "criterion {criterion}");
    }
}

#[test]
fn peak_to_peak_values() {
    assert_eq!(peak_to_peak(data().view()), vec![10.0, 8.0, 16.0]);
}

fn epoch(amplitude: f32) -> Epoch {
    Epoch {
        code: "A".into(),
        category: "target".into(),
        sample: 0,
        data: Array2::from_shape_fn((4, 50), |(c, t)| if c == 3 && t == 20 { amplitude } else { 0.0 }),
        rejected: false,
    }
}

#[test]
fn epoch_rejected_when_any_channel_exceeds() {
    let mut epochs = vec![epoch(5.0), epoch(150.0), epoch(99.0)];
    assert_eq!(reject_epochs(&mut epochs, 100.0), 1);
    let flags: Vec<_> = epochs.iter().map(|e| e.rejected).collect();
    assert_eq!(flags, [false, true, false]);
}

#[test]
fn rejection_is_idempotent() {
    let mut epochs = vec![epoch(5.0), epoch(150.0), epoch(-300.0)];
    assert_eq!(reject_epochs(&mut epochs, 100.0), 2);
    let first: Vec<_> = epochs.iter().map(|e| e.rejected).collect();
    assert_eq!(reject_epochs(&mut epochs, 100.0), 0);
    let second: Vec<_> = epochs.iter().map(|e| e.rejected).collect();
    assert_eq!(first, second);
}

#[test]
fn rejection_never_clears_a_flag() {
    let mut epochs = vec![epoch(150.0)];
    reject_epochs(&mut epochs, 100.0);
    reject_epochs(&mut epochs, 1000.0);
    assert!(epochs[0].rejected);
}
