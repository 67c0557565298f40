use criterion::*;
use francis_core::{Mat, Parallelism};
use francis_evd::{
    compute_schur, hessenberg::make_hessenberg_in_place, tridiag_qr::compute_tridiag_in_place,
    SchurMode, SchurParams,
};

fn random(n: usize) -> Mat {
    Mat::with_dims(n, n, |_, _| rand::random::<f64>())
}

fn hessenberg(criterion: &mut Criterion) {
    for n in [32, 64, 128, 256, 512] {
        let mat = random(n);
        let mut h = mat.clone();
        let mut z = Mat::identity(n);
        let params = SchurParams::default();

        criterion.bench_function(&format!("hessenberg-st-{n}"), |bencher| {
            bencher.iter(|| {
                h.as_mut().copy_from(mat.as_ref());
                make_hessenberg_in_place(h.as_mut(), Some(z.as_mut()), Parallelism::None, &params);
            });
        });
        criterion.bench_function(&format!("hessenberg-mt-{n}"), |bencher| {
            bencher.iter(|| {
                h.as_mut().copy_from(mat.as_ref());
                make_hessenberg_in_place(
                    h.as_mut(),
                    Some(z.as_mut()),
                    Parallelism::Rayon(0),
                    &params,
                );
            });
        });
    }
}

fn real_schur(criterion: &mut Criterion) {
    for n in [32, 64, 128, 256] {
        let mat = random(n);
        let mut t = mat.clone();
        let mut z = Mat::identity(n);

        for (name, parallelism) in [("st", Parallelism::None), ("mt", Parallelism::Rayon(0))] {
            criterion.bench_function(&format!("real-schur-{name}-{n}"), |bencher| {
                bencher.iter(|| {
                    t.as_mut().copy_from(mat.as_ref());
                    z = Mat::identity(n);
                    compute_schur(
                        t.as_mut(),
                        Some(z.as_mut()),
                        SchurMode::Full,
                        parallelism,
                        SchurParams::default(),
                    )
                    .unwrap();
                });
            });
        }

        criterion.bench_function(&format!("real-eigenvalues-st-{n}"), |bencher| {
            bencher.iter(|| {
                t.as_mut().copy_from(mat.as_ref());
                compute_schur(
                    t.as_mut(),
                    None,
                    SchurMode::BlocksOnly,
                    Parallelism::None,
                    SchurParams::default(),
                )
                .unwrap();
            });
        });
    }
}

fn multishift(criterion: &mut Criterion) {
    for n in [256, 512] {
        let mat = random(n);
        let mut t = mat.clone();
        let params = SchurParams {
            multishift_threshold: 64,
            ..Default::default()
        };

        criterion.bench_function(&format!("real-schur-multishift-{n}"), |bencher| {
            bencher.iter(|| {
                t.as_mut().copy_from(mat.as_ref());
                compute_schur(t.as_mut(), None, SchurMode::Full, Parallelism::Rayon(0), params)
                    .unwrap();
            });
        });
    }
}

fn tridiagonal_evd(criterion: &mut Criterion) {
    for n in [32, 64, 128, 256, 512, 1024] {
        let mat = Mat::with_dims(n, n, |i, j| {
            if i == j {
                2.0
            } else if i == j + 1 || j == i + 1 {
                -1.0
            } else {
                0.0
            }
        });
        let mut t = mat.clone();
        let mut z = Mat::identity(n);

        criterion.bench_function(&format!("tridiag-evd-st-{n}"), |bencher| {
            bencher.iter(|| {
                t.as_mut().copy_from(mat.as_ref());
                compute_tridiag_in_place(
                    t.as_mut(),
                    Some(z.as_mut()),
                    0,
                    n,
                    SchurMode::Full,
                    Parallelism::None,
                    &SchurParams::default(),
                    None,
                )
                .unwrap();
            });
        });
    }
}

criterion_group!(benches, hessenberg, real_schur, multishift, tridiagonal_evd);
criterion_main!(benches);
