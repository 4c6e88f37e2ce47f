use neural_style as ns;
use std::sync::Arc;

fn main() -> Result<(), ns::Error> {
    // torchvision's VGG19 converted to safetensors
    let vgg = ns::Vgg19::load(
        "vgg19.safetensors",
        ns::LayerSelection::default(),
        &ns::candle_core::Device::Cpu,
    )?;

    let session = ns::Session::builder()
        // the image whose structure we keep
        .content_image(&"imgs/content.jpg")
        // the image whose textures and colors we want
        .style_image(&"imgs/style.jpg")
        .max_size(256)
        .iterations(300)
        .extractor(Arc::new(vgg))
        .build()?;

    let styled = session.run(Some(Box::new(|update: ns::ProgressUpdate<'_>| {
        if update.iteration % 50 == 0 {
            println!(
                "{}/{}: loss {} (best {})",
                update.iteration, update.total, update.loss.total, update.best_loss
            );
        }
    })))?;

    styled.save("out/01.jpg")
}
