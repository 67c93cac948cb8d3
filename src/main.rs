use rand::SeedableRng;
use rand::rngs::StdRng;
use ukiyo_grad::{Example, Graph, Mlp, TrainConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut g = Graph::new();
    let a = g.leaf(2.0);
    let b = g.leaf(-3.0);
    let c = g.leaf(10.0);
    let e = g.mul(a, b);
    let d = g.add(e, c);
    let f = g.leaf(-2.0);
    let l = g.mul(d, f);
    g.backward(l);
    // Value(data=-8.0000, grad=1.0000, op=*)
    //     Value(data=4.0000, grad=-2.0000, op=+)
    //         Value(data=-6.0000, grad=-2.0000, op=*)
    //             Value(data=2.0000, grad=6.0000)
    //             Value(data=-3.0000, grad=-4.0000)
    //         Value(data=10.0000, grad=-2.0000)
    //     Value(data=-2.0000, grad=4.0000)
    print!("{}", g.display(l));

    let seed = std::env::args()
        .nth(1)
        .map(|s| s.parse::<u64>())
        .transpose()?
        .unwrap_or(42);
    let mut net = Mlp::with_rng(3, &[4, 4, 1], &mut StdRng::seed_from_u64(seed))?;
    let examples = [
        Example::new([2.0, 3.0, -1.0], 1.0),
        Example::new([3.0, -1.0, 0.5], -1.0),
        Example::new([0.5, 1.0, 1.0], -1.0),
        Example::new([1.0, 1.0, -1.0], 1.0),
    ];
    // some seeds need well over the library default to cross the threshold
    let config = TrainConfig {
        max_iterations: 250_000,
        ..TrainConfig::default()
    };
    let outcome = net.train(&examples, &config)?;
    println!("seed {seed}: {outcome}");

    for x in [[0.4, 1.2, 0.9], [1.1, 0.9, -0.8]] {
        let y = net.infer(&x)?;
        println!("{x:?} -> {:.4}", y[0]);
    }

    Ok(())
}
