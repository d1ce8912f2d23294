use wasm_bindgen::prelude::*;
use wasm_bindgen::Clamped;

use std::cell::RefCell;
use std::rc::Rc;

use gloo_file::Blob;
use wasm_bindgen::JsCast;
use web_sys::{self, CanvasRenderingContext2d, HtmlCanvasElement, HtmlElement, ImageData};

pub mod codec;
pub mod imaging;
pub mod metadata;
pub mod render;
pub mod signature;

pub use imaging::{normalize, normalize_bytes, BitDepth, NormalizedImage};
pub use metadata::format_report;
pub use signature::{has_dicm_signature, is_valid_container};

// When the `wee_alloc` feature is enabled, this uses `wee_alloc` as the global
// allocator.
//
// If you don't want to use `wee_alloc`, you can safely delete this.
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Why a dropped file could not be shown.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum LoadFailure {
    /// No file was provided.
    Cancelled,
    /// The file is not a DICOM Part-10 file.
    Format,
    /// The file looks like DICOM, but no image could be obtained from it.
    Content,
}

impl LoadFailure {
    pub fn message(self) -> &'static str {
        match self {
            LoadFailure::Cancelled => "No file was selected.",
            LoadFailure::Format => "The selected file is not a valid DICOM file.",
            LoadFailure::Content => "Could not read an image from the selected DICOM file.",
        }
    }
}

/// Validate and normalize a dropped file into an 8-bit image.
pub fn load_dropped_file(data: Option<&[u8]>) -> Result<NormalizedImage, LoadFailure> {
    let data = data.ok_or(LoadFailure::Cancelled)?;
    if !has_dicm_signature(data) {
        return Err(LoadFailure::Format);
    }
    let image = normalize_bytes(data, false);
    if image.is_valid() {
        Ok(image)
    } else {
        Err(LoadFailure::Content)
    }
}

fn clear(context: &CanvasRenderingContext2d) -> Result<(), JsValue> {
    context.set_fill_style(&JsValue::from_str("#000"));
    context.fill_rect(0., 0., 640., 640.);
    Ok(())
}

fn reset(context: &CanvasRenderingContext2d) -> Result<(), JsValue> {
    let width = 640;
    let height = 640;

    context.set_fill_style(&JsValue::from_str("#222"));
    context.fill_rect(0., 0., 640., 640.);

    context.set_line_width(2.);
    context.set_stroke_style(&"#fff".into());

    context.begin_path();

    let ref_x = width as f64 / 2.;
    let ref_y = height as f64 / 2.;

    // Draw an outer circle.
    context.arc(ref_x, ref_y, 128., 0., std::f64::consts::PI * 2.)?;

    // a vertical line
    context.move_to(ref_x, ref_y - 60.);
    context.line_to(ref_x, ref_y + 60.);

    // to the left
    context.move_to(ref_x, ref_y - 60.);
    context.line_to(ref_x - 55., ref_y);

    // to the right
    context.move_to(ref_x, ref_y - 60.);
    context.line_to(ref_x + 55., ref_y);

    context.stroke();

    Ok(())
}

fn set_element_text(id: &str, text: &str) {
    let document = match web_sys::window().and_then(|w| w.document()) {
        Some(document) => document,
        None => return,
    };
    if let Some(element) = document.get_element_by_id(id) {
        element.set_text_content(Some(text));
    }
}

fn set_error_message(msg: &str) {
    set_element_text("error-message", msg);
}

/// Build the canvas image data of a normalized image.
pub fn image_to_imagedata(image: &NormalizedImage) -> Result<ImageData, JsValue> {
    let data = render::to_rgba(image)
        .ok_or_else(|| JsValue::from_str("Unsupported image layout for display"))?;
    ImageData::new_with_u8_clamped_array_and_sh(Clamped(&data), image.width(), image.height())
}

fn render_image_to_canvas(state: &RefCell<State>) {
    let state = state.borrow();
    let State {
        image,
        canvas,
        canvas_context,
        out_canvas,
        out_canvas_context,
    } = &*state;

    let image = if let Some(image) = image {
        image
    } else {
        gloo_console::warn!("No DICOM image loaded");
        return;
    };

    match image_to_imagedata(image) {
        Ok(imagedata) => {
            let w = imagedata.width();
            let h = imagedata.height();

            // send to inner canvas with original size
            canvas.set_width(w);
            canvas.set_height(h);
            canvas_context
                .put_image_data(&imagedata, 0., 0.)
                .unwrap_or_else(|e| {
                    gloo_console::error!("Error rendering image data:", e);
                });

            // scale to fit output canvas
            let scale = if w > h {
                out_canvas.width() as f64 / w as f64
            } else {
                out_canvas.height() as f64 / h as f64
            };

            gloo_console::debug!("scale:", scale);

            // set scaling transformation
            out_canvas_context
                .set_transform(scale, 0., 0., scale, 0., 0.)
                .unwrap_or_else(|e| {
                    gloo_console::error!("Error scaling image data:", e);
                });

            // draw contents of inner canvas to outer canvas
            out_canvas_context
                .draw_image_with_html_canvas_element(canvas, 0., 0.)
                .unwrap_or_else(|e| {
                    gloo_console::error!("Error drawing scaled image data:", e);
                });

            set_element_text("metadata", &format_report(image));
        }
        Err(e) => {
            gloo_console::error!("Failed to render DICOM image:", e);
            set_error_message(LoadFailure::Content.message());
        }
    }
}

/// Set up the file drop zone
fn set_drop_zone(state: Rc<RefCell<State>>, element: &HtmlElement) {
    let ondrop_callback = Closure::wrap(Box::new(move |event: web_sys::DragEvent| {
        event.prevent_default();

        let file = event
            .data_transfer()
            .and_then(|data_transfer| data_transfer.files())
            .and_then(|file_list| file_list.get(0));

        let file = match file {
            Some(file) => file,
            None => {
                set_error_message(LoadFailure::Cancelled.message());
                return;
            }
        };

        let state = Rc::clone(&state);
        let blob: Blob = file.into();
        let file_reader = gloo_file::callbacks::read_as_bytes(&blob, move |outcome| {
            let data = match outcome {
                Ok(data) => data,
                Err(e) => {
                    gloo_console::error!("Failed to read file:", e.to_string());
                    set_error_message("Could not read the selected file.");
                    return;
                }
            };

            let image = match load_dropped_file(Some(&data)) {
                Ok(image) => image,
                Err(failure) => {
                    gloo_console::error!(failure.message());
                    set_error_message(failure.message());
                    return;
                }
            };

            {
                let mut state = state.borrow_mut();
                state.image = Some(image);
                set_error_message("");

                if let Err(e) = clear(&state.out_canvas_context) {
                    gloo_console::error!("Could not clear canvas:", e);
                }
            }

            render_image_to_canvas(&state);
        });

        std::mem::forget(file_reader);
    }) as Box<dyn FnMut(_)>);

    let ondragover_callback = Closure::wrap(Box::new(move |event: web_sys::DragEvent| {
        event.prevent_default();
    }) as Box<dyn FnMut(_)>);

    element.set_ondragover(Some(ondragover_callback.as_ref().unchecked_ref()));
    element.set_ondrop(Some(ondrop_callback.as_ref().unchecked_ref()));

    ondrop_callback.forget();
    ondragover_callback.forget();
}

/// The application's global state
#[derive(Debug)]
pub struct State {
    image: Option<NormalizedImage>,
    canvas: HtmlCanvasElement,
    canvas_context: CanvasRenderingContext2d,
    out_canvas: HtmlCanvasElement,
    out_canvas_context: CanvasRenderingContext2d,
}

fn canvas_2d(
    document: &web_sys::Document,
    id: &str,
) -> Result<(HtmlCanvasElement, CanvasRenderingContext2d), JsValue> {
    let canvas: HtmlCanvasElement = document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("canvas #{} is missing", id)))?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(JsValue::from)?;

    let context = canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("2D context is missing"))?
        .dyn_into::<CanvasRenderingContext2d>()
        .map_err(JsValue::from)?;

    Ok((canvas, context))
}

// This is like the `main` function for our Rust webapp.
#[wasm_bindgen(start)]
pub fn main_js() -> Result<(), JsValue> {
    // This provides better error messages in debug mode.
    // It's disabled in release mode so it doesn't bloat up the file size.
    #[cfg(debug_assertions)]
    console_error_panic_hook::set_once();

    if let Err(e) = console_log::init_with_level(log::Level::Info) {
        gloo_console::warn!("Could not set up logging:", e.to_string());
    }

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global `window` exists"))?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("should have a document on window"))?;

    // fetch canvases
    let (canvas, context) = canvas_2d(&document, "view_inner")?;
    let (out_canvas, out_context) = canvas_2d(&document, "view")?;

    // clear canvas
    reset(&out_context)?;

    // create the application state
    let state = Rc::new(RefCell::new(State {
        image: None,
        canvas,
        canvas_context: context,
        out_canvas,
        out_canvas_context: out_context,
    }));

    // get drop_zone
    let drop_zone: HtmlElement = document
        .get_element_by_id("drop_zone")
        .ok_or_else(|| JsValue::from_str("drop_zone should exist"))?
        .dyn_into()
        .map_err(JsValue::from)?;

    set_drop_zone(Rc::clone(&state), &drop_zone);

    Ok(())
}
