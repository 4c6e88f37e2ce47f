mod progress;

use structopt::StructOpt;

use neural_style::{
    candle_core::Device,
    image::{DynamicImage, ImageOutputFormat as ImgFmt},
    AdamParams, Error, InitImage, LayerSelection, Session, StyleProgress, Vgg19,
};
use progress::LossBar;
use std::{path::PathBuf, sync::Arc};

fn parse_img_fmt(input: &str) -> Result<ImgFmt, String> {
    let fmt = match input {
        "png" => ImgFmt::Png,
        "jpg" => ImgFmt::Jpeg(75),
        "bmp" => ImgFmt::Bmp,
        other => {
            return Err(format!(
                "image format `{}` not one of: 'png', 'jpg', 'bmp'",
                other
            ))
        }
    };

    Ok(fmt)
}

fn split_layers(input: &str) -> Vec<&str> {
    input.split(',').map(str::trim).collect()
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
struct Tweaks {
    /// How strongly mismatched textures are penalized
    #[structopt(long, default_value = "0.01")]
    style_weight: f64,
    /// How strongly a changed structure is penalized
    #[structopt(long, default_value = "1000")]
    content_weight: f64,
    /// The Adam step size, in pixel units
    #[structopt(long, default_value = "5")]
    learning_rate: f64,
    /// Decay rate of Adam's running gradient mean
    #[structopt(long, default_value = "0.99")]
    beta1: f64,
    /// Decay rate of Adam's running squared gradient mean
    #[structopt(long, default_value = "0.999")]
    beta2: f64,
    /// Keeps Adam's steps bounded where the gradient is tiny
    #[structopt(long, default_value = "0.1")]
    epsilon: f64,
    /// Start from the content image blended with noise from this seed, rather
    /// than from the content image itself
    #[structopt(long)]
    noise_seed: Option<u64>,
    /// The share of noise in the starting image when `--noise-seed` is given.
    /// Range (0.0 - 1.0)
    #[structopt(long, default_value = "0.6")]
    noise_ratio: f32,
}

#[derive(StructOpt)]
#[structopt(
    name = "neural-style",
    about = "Repaints a content image in the style of another image",
    rename_all = "kebab-case"
)]
struct Opt {
    /// The image whose structure is kept
    #[structopt(long, parse(from_os_str))]
    content: PathBuf,
    /// The image whose textures and colors are transferred
    #[structopt(long, parse(from_os_str))]
    style: PathBuf,
    /// VGG19 weights in safetensors format, using torchvision's tensor names
    #[structopt(long, default_value = "vgg19.safetensors", parse(from_os_str))]
    weights: PathBuf,
    /// Comma separated layers compared through their Gram matrices
    #[structopt(
        long,
        default_value = "block1_conv1,block2_conv1,block3_conv1,block4_conv1,block5_conv1"
    )]
    style_layers: String,
    /// Comma separated layers compared directly
    #[structopt(long, default_value = "block5_conv2")]
    content_layers: String,
    /// The number of gradient steps to take
    #[structopt(short, long, default_value = "1000")]
    iterations: u32,
    /// Both inputs are resized so their longest side is at most this many
    /// pixels. Use 0 to keep the original sizes.
    #[structopt(long, default_value = "512")]
    max_size: u32,
    /// The format to save the styled image as.
    ///
    /// NOTE: this will only apply when stdout is specified via `-o -`, otherwise the image
    /// format is determined by the file extension of the path provided to `-o`
    #[structopt(
        long,
        default_value = "png",
        parse(try_from_str = parse_img_fmt)
    )]
    out_fmt: ImgFmt,
    /// The path to save the styled image to, the file extensions of the path determines
    /// the image format used. You may use `-` for stdout.
    #[structopt(long = "out", short, parse(from_os_str))]
    output_path: PathBuf,
    /// Don't show a progress bar
    #[structopt(long)]
    no_progress: bool,
    #[structopt(flatten)]
    tweaks: Tweaks,
}

fn main() {
    env_logger::init();

    if let Err(e) = real_main() {
        if atty::is(atty::Stream::Stderr) {
            eprintln!("\x1b[31merror\x1b[0m: {}", e);
        } else {
            eprintln!("error: {}", e);
        }

        std::process::exit(1);
    }
}

fn real_main() -> Result<(), Error> {
    let args = Opt::from_args();

    // Check that the extension for the path supplied by the user is one of the ones we support
    {
        match args.output_path.extension().and_then(|ext| ext.to_str()) {
            Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") => {}
            None => {}
            Some(other) => return Err(Error::UnsupportedOutputFormat(other.to_owned())),
        }
    }

    let layers = LayerSelection::new(
        split_layers(&args.style_layers),
        split_layers(&args.content_layers),
    )?;

    let vgg = Vgg19::load(&args.weights, layers, &Device::Cpu)?;

    let tweaks = &args.tweaks;
    let mut sb = Session::builder()
        .content_image(&args.content)
        .style_image(&args.style)
        .iterations(args.iterations)
        .style_weight(tweaks.style_weight)
        .content_weight(tweaks.content_weight)
        .adam(AdamParams {
            learning_rate: tweaks.learning_rate,
            beta1: tweaks.beta1,
            beta2: tweaks.beta2,
            epsilon: tweaks.epsilon,
        })
        .extractor(Arc::new(vgg));

    sb = if args.max_size == 0 {
        sb.keep_input_size()
    } else {
        sb.max_size(args.max_size)
    };

    if let Some(seed) = tweaks.noise_seed {
        sb = sb.init_image(InitImage::Noise {
            seed,
            ratio: tweaks.noise_ratio,
        });
    }

    let session = sb.build()?;

    let progress: Option<Box<dyn StyleProgress>> = if !args.no_progress {
        Some(Box::new(LossBar::new(args.iterations)))
    } else {
        None
    };

    let styled = match session.run(progress) {
        Ok(styled) => styled,
        Err(Error::NonFiniteLoss(nf)) => {
            // keep whatever was reached before the loss blew up
            if let Some(image) = nf.best().and_then(|best| best.image()) {
                log::warn!(
                    "saving the best image found before iteration {}",
                    nf.iteration()
                );
                emit(DynamicImage::ImageRgb8(image.clone()), &args)?;
            }

            return Err(Error::NonFiniteLoss(nf));
        }
        Err(e) => return Err(e),
    };

    log::info!(
        "best loss {} after {} iterations",
        styled.loss(),
        styled.iterations()
    );

    emit(styled.into_image(), &args)
}

fn emit(image: DynamicImage, args: &Opt) -> Result<(), Error> {
    if args.output_path.to_str() == Some("-") {
        let mut encoded = std::io::Cursor::new(Vec::new());
        image.write_to(&mut encoded, args.out_fmt.clone())?;

        let out = std::io::stdout();
        let mut out = out.lock();
        std::io::Write::write_all(&mut out, encoded.get_ref())?;
    } else {
        // This won't respect the output format specified by the user,
        // only the extension on the path they specify, but that makes
        // more sense, and is probably better than detecting and emitting
        // an error
        if let Some(parent) = args.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(&args.output_path)?;
    }

    Ok(())
}
